pub mod packet;
pub mod scan;

pub use packet::run_packet_listener;
pub use scan::ScanHandler;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;

use crate::error::PipelineError;
use crate::models::{Dimensions, ImagePayload};
use crate::services::TransientSlot;

/// `size`, `height` and `width`, each a big-endian u16.
pub const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Saturates at 65535 on the sending side, so only informational.
    pub size: u16,
    pub height: u16,
    pub width: u16,
}

/// Split one connection's bytes into an image payload.
///
/// Data that already looks like an encoded image is taken as-is; anything
/// else must start with a `PacketHeader`.
pub fn parse_packet(data: &[u8]) -> Result<ImagePayload, PipelineError> {
    if image::guess_format(data).is_ok() {
        return Ok(ImagePayload::new(data.to_vec(), None, None));
    }

    if data.len() <= HEADER_LEN {
        return Err(PipelineError::InvalidInput(format!(
            "packet of {} bytes has neither an image nor a header",
            data.len()
        )));
    }

    let header = PacketHeader {
        size: u16::from_be_bytes([data[0], data[1]]),
        height: u16::from_be_bytes([data[2], data[3]]),
        width: u16::from_be_bytes([data[4], data[5]]),
    };
    let body = &data[HEADER_LEN..];

    log::debug!(
        "📦 Packet header: size={}, height={}, width={}",
        header.size,
        header.height,
        header.width
    );
    if header.size as usize != body.len().min(u16::MAX as usize) {
        log::warn!(
            "⚠️ Packet header announces {} bytes, received {}",
            header.size,
            body.len()
        );
    }

    let declared = (header.width > 0 && header.height > 0).then(|| Dimensions {
        width: header.width as u32,
        height: header.height as u32,
    });

    Ok(ImagePayload {
        bytes: body.to_vec(),
        declared,
    })
}

/// Read one packet until the sender closes, refusing anything over
/// `max_bytes` without buffering the rest.
pub async fn read_packet<R>(reader: R, max_bytes: usize) -> Result<Vec<u8>, PipelineError>
where
    R: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    reader
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut data)
        .await?;

    if data.len() > max_bytes {
        return Err(PipelineError::InvalidInput(format!(
            "packet exceeds the {} byte limit",
            max_bytes
        )));
    }
    Ok(data)
}

/// Accept raw image packets over TCP. Each connection carries one image,
/// read until the sender closes; results only go to the relay.
pub async fn run_packet_listener(listener: TcpListener, slot: TransientSlot, max_bytes: usize) {
    match listener.local_addr() {
        Ok(addr) => log::info!("📡 Packet listener running on {}", addr),
        Err(e) => log::warn!("⚠️ Packet listener address unknown: {}", e),
    }

    loop {
        let (mut socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("❌ Packet listener accept failed: {}", e);
                continue;
            }
        };

        let slot = slot.clone();
        tokio::spawn(async move {
            log::info!("🔌 Client connected: {}", peer);

            let data = match read_packet(&mut socket, max_bytes).await {
                Ok(data) => data,
                Err(e) => {
                    log::error!("❌ Packet from {} refused: {}", peer, e);
                    return;
                }
            };
            log::info!("📨 Received {} bytes from {}", data.len(), peer);

            let payload = match parse_packet(&data) {
                Ok(payload) => payload,
                Err(e) => {
                    log::warn!("⚠️ Dropping packet from {}: {}", peer, e);
                    return;
                }
            };

            if let Err(e) = slot.submit(&payload.bytes, payload.declared, None).await {
                log::warn!("⚠️ Packet from {} not queued: {}", peer, e);
            }
        });
    }
}

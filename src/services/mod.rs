pub mod classifier; // Pretrained food classifier (ONNX)
pub mod enricher;
pub mod ingest;
pub mod mistral; // Mistral hosted language model
pub mod relay;
pub mod slot;

pub use classifier::{FoodClassifier, ModelHandle, OnnxFoodClassifier};
pub use enricher::{Enrichment, NutritionEnricher};
pub use mistral::MistralService;
pub use relay::RelayClient;
pub use slot::{ScanJob, ScanOutcome, TransientSlot};

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::models::NutritionRecord;
use crate::services::classifier::top_prediction;
use crate::services::ingest::load_image;
use crate::services::{Enrichment, FoodClassifier, NutritionEnricher, RelayClient, ScanJob};

/// Where a cycle currently is. Any failure in decoding, classifying or
/// enriching jumps to `ErrorResponse`; every cycle ends in `Cleanup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    WaitingForImage,
    Decoding,
    Classifying,
    Enriching,
    Responding,
    ErrorResponse,
    Cleanup,
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CycleStage::WaitingForImage => "waiting_for_image",
            CycleStage::Decoding => "decoding",
            CycleStage::Classifying => "classifying",
            CycleStage::Enriching => "enriching",
            CycleStage::Responding => "responding",
            CycleStage::ErrorResponse => "error_response",
            CycleStage::Cleanup => "cleanup",
        };
        write!(f, "{}", s)
    }
}

/// Runs the decode → classify → enrich cycle for one image at a time.
pub struct ScanHandler {
    classifier: Arc<dyn FoodClassifier>,
    enricher: Arc<dyn NutritionEnricher>,
    relay: Option<Arc<RelayClient>>,
}

impl ScanHandler {
    pub fn new(
        classifier: Arc<dyn FoodClassifier>,
        enricher: Arc<dyn NutritionEnricher>,
        relay: Option<Arc<RelayClient>>,
    ) -> Self {
        Self {
            classifier,
            enricher,
            relay,
        }
    }

    /// Worker loop. Blocks on the slot until an image arrives and exits once
    /// every producer is gone.
    pub async fn run(self: Arc<Self>, mut jobs: mpsc::Receiver<ScanJob>) {
        log::info!("👷 Scan worker {}", CycleStage::WaitingForImage);
        while let Some(job) = jobs.recv().await {
            self.process(job).await;
            log::debug!("👷 Scan worker {}", CycleStage::WaitingForImage);
        }
        log::info!("🛑 Scan worker stopped");
    }

    pub async fn process(&self, mut job: ScanJob) {
        let id = job.id;

        let outcome = match self.run_cycle(&job).await {
            Ok(record) => {
                log::info!("🔄 Job #{} {}", id, CycleStage::Responding);
                Ok(record)
            }
            Err((stage, err)) => {
                log::info!("🔄 Job #{} {}", id, CycleStage::ErrorResponse);
                log::error!("❌ Job #{} failed while {}: {}", id, stage, err);
                let response = err.to_response(&stage.to_string());
                log::debug!("Traceback:\n{}", response.traceback);
                Err(response)
            }
        };

        let relayed = outcome.as_ref().ok().cloned();

        if let Some(reply) = job.reply.take() {
            if reply.send(outcome).is_err() {
                log::warn!("⚠️ Job #{}: caller went away before the answer was ready", id);
            }
        }

        log::debug!("🔄 Job #{} {}", id, CycleStage::Cleanup);
        let elapsed = Utc::now() - job.received_at;
        // Frees the spool file and the slot before the relay round-trip.
        drop(job);
        log::info!("✅ Job #{} done in {} ms", id, elapsed.num_milliseconds());

        if let (Some(record), Some(relay)) = (relayed, &self.relay) {
            // A broken relay never changes what the caller got.
            if let Err(e) = relay.forward(&record).await {
                log::error!("❌ {}: {}", e.kind(), e);
            }
        }
    }

    async fn run_cycle(&self, job: &ScanJob) -> Result<NutritionRecord, (CycleStage, PipelineError)> {
        let id = job.id;

        log::info!("🔄 Job #{} {}", id, CycleStage::Decoding);
        let decoded = load_image(job.image.path(), job.declared)
            .await
            .map_err(|e| (CycleStage::Decoding, e))?;

        log::info!("🔄 Job #{} {}", id, CycleStage::Classifying);
        let classifier = self.classifier.clone();
        let predictions = tokio::task::spawn_blocking(move || classifier.classify(&decoded.image))
            .await
            .map_err(|e| {
                (
                    CycleStage::Classifying,
                    PipelineError::ModelUnavailable(format!("classifier task failed: {}", e)),
                )
            })?
            .map_err(|e| (CycleStage::Classifying, e))?;

        log::debug!("All predictions: {:?}", predictions);
        let top = top_prediction(&predictions).map_err(|e| (CycleStage::Classifying, e))?;
        log::info!("🍽️ Predicted food: {} (confidence: {:.2})", top.label, top.score);

        log::info!("🔄 Job #{} {}", id, CycleStage::Enriching);
        let enrichment = self
            .enricher
            .estimate(&top.label)
            .await
            .map_err(|e| (CycleStage::Enriching, e))?;

        Ok(resolve_enrichment(&top.label, enrichment))
    }
}

/// Turn whatever the nutrition service said into a schema-valid record,
/// substituting the zero-filled template when the answer was unusable.
pub fn resolve_enrichment(food_item: &str, enrichment: Enrichment) -> NutritionRecord {
    match enrichment {
        Enrichment::Parsed(record) => record,
        Enrichment::Malformed { raw, reason } => {
            let err = PipelineError::EnrichmentParse { reason, raw };
            log::warn!("⚠️ {}: {}", err.kind(), err);
            if let PipelineError::EnrichmentParse { raw, .. } = &err {
                log::warn!("📄 Raw response: {}", raw);
            }
            NutritionRecord::placeholder(food_item)
        }
    }
}

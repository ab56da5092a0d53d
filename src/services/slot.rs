use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};

use crate::config::SlotPolicy;
use crate::error::PipelineError;
use crate::models::{Dimensions, ErrorResponse, NutritionRecord};

pub type ScanOutcome = Result<NutritionRecord, ErrorResponse>;

/// The image file staged on disk for one cycle. Removed when dropped.
#[derive(Debug)]
pub struct TransientImage {
    path: PathBuf,
}

impl TransientImage {
    pub async fn persist(path: &Path, bytes: &[u8]) -> Result<Self, PipelineError> {
        tokio::fs::write(path, bytes).await?;
        log::debug!("💾 Staged {} bytes at {}", bytes.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientImage {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("🧹 Removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::error!("❌ Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// One image waiting for (or going through) a classify-enrich cycle.
pub struct ScanJob {
    pub id: u64,
    pub received_at: DateTime<Utc>,
    pub declared: Option<Dimensions>,
    /// `None` for fire-and-forget submissions whose result is only relayed.
    pub reply: Option<oneshot::Sender<ScanOutcome>>,
    // Field order matters: the file is deleted before the slot is released.
    pub image: TransientImage,
    _permit: OwnedSemaphorePermit,
}

/// Single-item hand-off between ingestion and the worker.
///
/// A one-permit semaphore covers the whole life of a job, from staging the
/// file to cleanup, so at most one image exists at a time and the staged file
/// is never overwritten while in use.
#[derive(Clone)]
pub struct TransientSlot {
    sender: mpsc::Sender<ScanJob>,
    permits: Arc<Semaphore>,
    policy: SlotPolicy,
    path: PathBuf,
    next_id: Arc<AtomicU64>,
}

impl TransientSlot {
    pub fn new(path: PathBuf, policy: SlotPolicy) -> (Self, mpsc::Receiver<ScanJob>) {
        let (sender, receiver) = mpsc::channel(1);
        let slot = Self {
            sender,
            permits: Arc::new(Semaphore::new(1)),
            policy,
            path,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (slot, receiver)
    }

    /// Stage `bytes` and hand the job to the worker. Returns the job id.
    pub async fn submit(
        &self,
        bytes: &[u8],
        declared: Option<Dimensions>,
        reply: Option<oneshot::Sender<ScanOutcome>>,
    ) -> Result<u64, PipelineError> {
        let permit = match self.policy {
            SlotPolicy::Wait => self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::SlotClosed)?,
            SlotPolicy::Reject => self.permits.clone().try_acquire_owned().map_err(|e| match e {
                tokio::sync::TryAcquireError::NoPermits => PipelineError::SlotBusy,
                tokio::sync::TryAcquireError::Closed => PipelineError::SlotClosed,
            })?,
        };

        let image = TransientImage::persist(&self.path, bytes).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let job = ScanJob {
            id,
            received_at: Utc::now(),
            declared,
            reply,
            image,
            _permit: permit,
        };

        self.sender
            .send(job)
            .await
            .map_err(|_| PipelineError::SlotClosed)?;

        log::info!("📥 Job #{} staged ({} bytes)", id, bytes.len());
        Ok(id)
    }

    /// Stage an image and wait for the cycle's outcome.
    pub async fn scan(
        &self,
        bytes: &[u8],
        declared: Option<Dimensions>,
    ) -> Result<ScanOutcome, PipelineError> {
        let (reply, outcome) = oneshot::channel();
        self.submit(bytes, declared, Some(reply)).await?;
        outcome.await.map_err(|_| PipelineError::SlotClosed)
    }

    /// Resolves once nothing is staged or in flight.
    pub async fn wait_idle(&self) {
        // A closed semaphore means nothing can be in flight any more.
        let _ = self.permits.acquire().await;
    }

    /// Wait for the job in flight, if any, then refuse every later image.
    pub async fn shutdown(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
        self.permits.close();
    }
}

use thiserror::Error;

use crate::models::ErrorResponse;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything that can go wrong between receiving an image and answering
/// with a nutrition record.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{message}")]
    Decode {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("classifier unavailable: {0}")]
    ModelUnavailable(String),

    #[error("nutrition service request failed: {0}")]
    Enrichment(String),

    /// Recovered locally by the zero-filled template, never sent to a caller.
    #[error("could not parse nutrition estimate: {reason}")]
    EnrichmentParse { reason: String, raw: String },

    #[error("relay to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("an image is already being processed, try again shortly")]
    SlotBusy,

    #[error("image pipeline is shut down")]
    SlotClosed,

    #[error("failed to stage image: {0}")]
    Spool(#[from] std::io::Error),
}

impl PipelineError {
    pub fn decode(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        PipelineError::Decode {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Taxonomy name reported as the first line of a diagnostic trace.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Decode { .. } | PipelineError::InvalidInput(_) => "DecodeError",
            PipelineError::ModelUnavailable(_) => "ModelUnavailable",
            PipelineError::Enrichment(_) => "EnrichmentError",
            PipelineError::EnrichmentParse { .. } => "EnrichmentParseError",
            PipelineError::Transport { .. } => "TransportError",
            PipelineError::SlotBusy => "SlotBusy",
            PipelineError::SlotClosed => "SlotClosed",
            PipelineError::Spool(_) => "SpoolError",
        }
    }

    /// Structured error body: the message plus a trace naming the stage,
    /// the error kind and every underlying cause.
    pub fn to_response(&self, stage: &str) -> ErrorResponse {
        let mut traceback = format!("stage: {}\n{}: {}", stage, self.kind(), self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            traceback.push_str(&format!("\n  caused by: {}", cause));
            source = cause.source();
        }

        ErrorResponse {
            status: "error".to_string(),
            message: self.to_string(),
            traceback,
        }
    }
}

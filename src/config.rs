//! Service configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_RELAY_URL: &str = "http://localhost:5001";
pub const DEFAULT_CLASSIFIER_MODEL_ID: &str = "eslamxm/vit-base-food101";
pub const DEFAULT_CLASSIFIER_MODEL_PATH: &str = "models/vit-base-food101.onnx";
pub const DEFAULT_CLASSIFIER_LABELS_PATH: &str = "models/food101-labels.txt";
pub const DEFAULT_MISTRAL_MODEL: &str = "mistral-large-latest";
pub const DEFAULT_MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
pub const DEFAULT_SPOOL_PATH: &str = "received_image.jpg";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
}

/// What a producer does when an image is already staged or in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPolicy {
    /// Wait for the slot to free up; submissions are processed one by one.
    Wait,
    /// Refuse the new image straight away.
    Reject,
}

impl SlotPolicy {
    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "wait" | "serialize" => Some(SlotPolicy::Wait),
            "reject" => Some(SlotPolicy::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Hugging Face id the ONNX export was made from (logged only).
    pub model_id: String,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: String,
    /// Raw packet listener, disabled when unset.
    pub packet_addr: Option<String>,
    /// Downstream sink for finished records, disabled when unset.
    pub relay_url: Option<String>,
    pub relay_timeout: Duration,
    pub classifier: ClassifierConfig,
    pub llm: LlmConfig,
    pub spool_path: PathBuf,
    pub slot_policy: SlotPolicy,
    pub max_body_bytes: usize,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Required:
    /// - `MISTRAL_API_KEY`
    ///
    /// Everything else falls back to the defaults above.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let api_key = lookup("MISTRAL_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("MISTRAL_API_KEY".to_string()))?;

        let relay_url = match lookup("RELAY_URL") {
            None => Some(DEFAULT_RELAY_URL.to_string()),
            Some(url) if url.trim().is_empty() || url.trim().eq_ignore_ascii_case("off") => None,
            Some(url) => Some(url.trim().to_string()),
        };

        let packet_addr = lookup("PACKET_ADDR").filter(|addr| !addr.trim().is_empty());

        let slot_policy = match lookup("SLOT_POLICY") {
            None => SlotPolicy::Wait,
            Some(value) => SlotPolicy::from_string(&value).ok_or(ConfigError::InvalidValue {
                name: "SLOT_POLICY".to_string(),
                value,
            })?,
        };

        Ok(Self {
            http_addr: get("HTTP_ADDR", DEFAULT_HTTP_ADDR),
            packet_addr,
            relay_url,
            relay_timeout: Duration::from_secs(parse_number(
                &lookup,
                "RELAY_TIMEOUT_SECS",
                DEFAULT_RELAY_TIMEOUT_SECS,
            )?),
            classifier: ClassifierConfig {
                model_id: get("CLASSIFIER_MODEL_ID", DEFAULT_CLASSIFIER_MODEL_ID),
                model_path: PathBuf::from(get("CLASSIFIER_MODEL_PATH", DEFAULT_CLASSIFIER_MODEL_PATH)),
                labels_path: PathBuf::from(get(
                    "CLASSIFIER_LABELS_PATH",
                    DEFAULT_CLASSIFIER_LABELS_PATH,
                )),
            },
            llm: LlmConfig {
                api_key,
                model: get("MISTRAL_MODEL", DEFAULT_MISTRAL_MODEL),
                base_url: get("MISTRAL_BASE_URL", DEFAULT_MISTRAL_BASE_URL),
                timeout: Duration::from_secs(parse_number(
                    &lookup,
                    "LLM_TIMEOUT_SECS",
                    DEFAULT_LLM_TIMEOUT_SECS,
                )?),
            },
            spool_path: PathBuf::from(get("SPOOL_PATH", DEFAULT_SPOOL_PATH)),
            slot_policy,
            max_body_bytes: parse_number(&lookup, "MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
        })
    }
}

fn parse_number<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
    }
}

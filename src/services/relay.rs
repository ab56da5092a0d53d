use std::time::Duration;

use crate::error::PipelineError;
use crate::models::NutritionRecord;

/// Forwards finished records to a downstream consumer. The consumer's answer
/// is logged, never interpreted.
pub struct RelayClient {
    url: String,
    client: reqwest::Client,
}

impl RelayClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| PipelineError::Transport {
                url: url.clone(),
                source,
            })?;

        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn forward(&self, record: &NutritionRecord) -> Result<String, PipelineError> {
        let transport_error = |source| PipelineError::Transport {
            url: self.url.clone(),
            source,
        };

        let response = self
            .client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        log::info!("📤 Relayed record to {} ({})", self.url, status);
        log::debug!("📨 Relay answered: {}", body);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_forward_posts_record() {
        let (tx, mut rx) = mpsc::channel::<NutritionRecord>(1);
        let router = Router::new().route(
            "/",
            post(move |Json(record): Json<NutritionRecord>| {
                let tx = tx.clone();
                async move {
                    tx.send(record).await.unwrap();
                    "received"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let relay = RelayClient::new(format!("http://{}/", addr), Duration::from_secs(5)).unwrap();
        let record = NutritionRecord::placeholder("sushi");

        let answer = relay.forward(&record).await.unwrap();
        assert_eq!(answer, "received");
        assert_eq!(rx.recv().await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_unreachable_sink_is_transport_error() {
        // Grab a free port, then close it again.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let relay = RelayClient::new(format!("http://{}/", addr), Duration::from_secs(2)).unwrap();
        let err = relay.forward(&NutritionRecord::placeholder("sushi")).await.unwrap_err();

        assert_eq!(err.kind(), "TransportError");
        assert!(err.to_string().contains(&addr.to_string()));
    }
}

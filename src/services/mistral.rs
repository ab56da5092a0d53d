use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::enricher::{build_prompt, parse_enrichment, Enrichment, NutritionEnricher};
use crate::config::LlmConfig;
use crate::error::PipelineError;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

/// Mistral chat-completions client used as the nutrition estimator.
pub struct MistralService {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl MistralService {
    pub fn new(config: &LlmConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Enrichment(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete(&self, prompt: String) -> Result<String, PipelineError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        log::info!("🤖 Sending request to Mistral with model: {}", self.model);

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Enrichment(e.to_string()))?;

        let status = response.status();
        log::debug!("📥 Mistral response status: {}", status);

        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::Enrichment(e.to_string()))?;

        if !status.is_success() {
            log::error!("❌ Mistral API error response: {}", body);
            return Err(PipelineError::Enrichment(format!("Mistral API error ({}): {}", status, body)));
        }

        let chat_response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::Enrichment(format!("unexpected Mistral response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::Enrichment("Mistral returned no choices".to_string()))
    }
}

#[async_trait]
impl NutritionEnricher for MistralService {
    async fn estimate(&self, food_item: &str) -> Result<Enrichment, PipelineError> {
        let content = self.complete(build_prompt(food_item)).await?;
        log::debug!("💬 Mistral response content: {}", content);
        Ok(parse_enrichment(&content))
    }
}

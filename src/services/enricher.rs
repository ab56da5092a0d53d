use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::NutritionRecord;

/// What came back from the nutrition service, before any fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum Enrichment {
    Parsed(NutritionRecord),
    /// The answer was not a schema-valid record; `raw` is kept for logs.
    Malformed { raw: String, reason: String },
}

/// Trait for services that estimate nutrition facts from a food label.
#[async_trait]
pub trait NutritionEnricher: Send + Sync {
    /// Transport and API failures are errors; an unparseable answer is not.
    async fn estimate(&self, food_item: &str) -> Result<Enrichment, PipelineError>;
}

pub fn build_prompt(food_item: &str) -> String {
    let template = NutritionRecord::placeholder("FOOD_ITEM").to_pretty_json();
    format!(
        "Estimate the nutrition facts for a medium portion size of {}. \
         Return ONLY a JSON object in this exact format, replacing the values with realistic estimates: {}. \
         Do not include any other text or explanation. Make sure all numeric values are integers.",
        food_item, template
    )
}

/// Drop markdown code fences and parse what is left.
pub fn parse_enrichment(raw: &str) -> Enrichment {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    match serde_json::from_str::<NutritionRecord>(cleaned) {
        Ok(record) => Enrichment::Parsed(record),
        Err(e) => Enrichment::Malformed {
            raw: raw.to_string(),
            reason: e.to_string(),
        },
    }
}

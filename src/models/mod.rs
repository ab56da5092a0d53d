use serde::{Deserialize, Serialize};

/// Fixed-shape nutrition estimate returned to callers and relayed downstream.
///
/// Every numeric leaf is an integer; a non-integer number in an incoming
/// document fails deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionRecord {
    pub food_item: FoodItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodItem {
    pub name: String,
    pub serving_size: ServingSize,
    pub nutrition: Nutrition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingSize {
    pub amount: i64,
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nutrition {
    pub calories: i64,
    pub macros: Macros,
    pub micronutrients: Micronutrients,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macros {
    pub protein: i64,
    pub carbohydrates: i64,
    pub fat: i64,
    pub fiber: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Micronutrients {
    pub sodium: i64,
    pub potassium: i64,
    pub cholesterol: i64,
    pub vitamin_a: i64,
    pub vitamin_c: i64,
    pub calcium: i64,
    pub iron: i64,
}

impl NutritionRecord {
    /// The zero-filled template: 100 grams of `name`, every number zero.
    pub fn placeholder(name: &str) -> Self {
        Self {
            food_item: FoodItem {
                name: name.to_string(),
                serving_size: ServingSize {
                    amount: 100,
                    unit: "grams".to_string(),
                },
                nutrition: Nutrition::default(),
            },
        }
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// One (label, score) pair from the food classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Encoded image bytes plus whatever size the sender claimed.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub declared: Option<Dimensions>,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, width: Option<u32>, height: Option<u32>) -> Self {
        let declared = match (width, height) {
            (Some(width), Some(height)) => Some(Dimensions { width, height }),
            _ => None,
        };
        Self { bytes, declared }
    }
}

/// Body of every failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
    pub traceback: String,
}

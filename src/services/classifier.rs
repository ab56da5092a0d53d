use anyhow::Context;
use image::{imageops::FilterType, DynamicImage, RgbImage};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tract_onnx::prelude::*;

use crate::error::PipelineError;
use crate::models::Prediction;

/// Side length the ViT food model was trained on.
pub const INPUT_SIZE: u32 = 224;

// Normalization of the model's own image processor.
const IMAGE_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const IMAGE_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Anything that can turn a photo into ranked food labels.
pub trait FoodClassifier: Send + Sync {
    /// Predictions ranked by descending score.
    fn classify(&self, image: &DynamicImage) -> Result<Vec<Prediction>, PipelineError>;
}

type FoodModelPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct LoadedModel {
    plan: FoodModelPlan,
    labels: Vec<String>,
}

/// Model weights loaded at most once and shared read-only afterwards.
///
/// A failed load is remembered: every later call reports the same
/// `ModelUnavailable` instead of retrying or guessing a label.
pub struct ModelHandle {
    model_path: PathBuf,
    labels_path: PathBuf,
    cell: OnceLock<Result<Arc<LoadedModel>, String>>,
}

impl ModelHandle {
    pub fn new(model_path: PathBuf, labels_path: PathBuf) -> Self {
        Self {
            model_path,
            labels_path,
            cell: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Result<Arc<LoadedModel>, PipelineError> {
        self.cell
            .get_or_init(|| {
                load_model(&self.model_path, &self.labels_path)
                    .map(Arc::new)
                    .map_err(|e| format!("{:#}", e))
            })
            .clone()
            .map_err(PipelineError::ModelUnavailable)
    }

    /// Trigger the load now so a broken model shows up at startup.
    pub fn warm_up(&self) -> Result<usize, PipelineError> {
        self.get().map(|model| model.labels.len())
    }
}

fn load_model(model_path: &std::path::Path, labels_path: &std::path::Path) -> anyhow::Result<LoadedModel> {
    let labels_text = std::fs::read_to_string(labels_path)
        .with_context(|| format!("reading labels from {}", labels_path.display()))?;
    let labels = parse_labels(&labels_text);
    if labels.is_empty() {
        anyhow::bail!("labels file {} is empty", labels_path.display());
    }

    let size = INPUT_SIZE as usize;
    let plan = tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("loading model from {}", model_path.display()))?
        .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)))?
        .into_optimized()?
        .into_runnable()?;

    Ok(LoadedModel { plan, labels })
}

pub fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resize to the model resolution, normalize to `[0,1]`, then rescale back to
/// 8-bit. The pretrained model's calling convention expects exactly this
/// round-trip before its own input transform.
pub fn preprocess(image: &DynamicImage) -> RgbImage {
    let resized = image
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom)
        .to_rgb8();

    let normalized: Vec<f64> = resized.as_raw().iter().map(|&v| v as f64 / 255.0).collect();
    let rescaled: Vec<u8> = normalized.iter().map(|&v| (v * 255.0) as u8).collect();

    RgbImage::from_raw(INPUT_SIZE, INPUT_SIZE, rescaled).unwrap_or(resized)
}

fn to_input_tensor(image: &RgbImage) -> Tensor {
    let size = INPUT_SIZE as usize;
    tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let value = image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (value - IMAGE_MEAN[c]) / IMAGE_STD[c]
    })
    .into()
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Pair scores with labels and sort, highest first.
pub fn rank(labels: &[String], scores: &[f32]) -> Vec<Prediction> {
    let mut predictions: Vec<Prediction> = labels
        .iter()
        .zip(scores)
        .map(|(label, &score)| Prediction {
            label: label.clone(),
            score,
        })
        .collect();
    predictions.sort_by(|a, b| b.score.total_cmp(&a.score));
    predictions
}

/// The single highest-scoring prediction; the earliest one wins a tie.
pub fn top_prediction(predictions: &[Prediction]) -> Result<&Prediction, PipelineError> {
    predictions
        .iter()
        .reduce(|best, p| if p.score > best.score { p } else { best })
        .ok_or_else(|| PipelineError::ModelUnavailable("classifier returned no predictions".to_string()))
}

pub struct OnnxFoodClassifier {
    model: Arc<ModelHandle>,
}

impl OnnxFoodClassifier {
    pub fn new(model: Arc<ModelHandle>) -> Self {
        Self { model }
    }
}

impl FoodClassifier for OnnxFoodClassifier {
    fn classify(&self, image: &DynamicImage) -> Result<Vec<Prediction>, PipelineError> {
        let model = self.model.get()?;
        let inference_error = |e: anyhow::Error| PipelineError::ModelUnavailable(format!("inference failed: {:#}", e));

        let input = to_input_tensor(&preprocess(image));
        let outputs = model.plan.run(tvec!(input.into())).map_err(inference_error)?;
        let logits = outputs[0].to_array_view::<f32>().map_err(inference_error)?;
        let logits: Vec<f32> = logits.iter().copied().collect();

        if logits.len() != model.labels.len() {
            return Err(PipelineError::ModelUnavailable(format!(
                "model produced {} scores for {} labels",
                logits.len(),
                model.labels.len()
            )));
        }

        Ok(rank(&model.labels, &softmax(&logits)))
    }
}

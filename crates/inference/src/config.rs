use crate::history::HistoryCategory;
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Model loaded at startup and reused by reloads that name no path.
    pub model_path: String,
    pub confidence_threshold: f32,
    /// Square network input edge; exports that declare `imgsz` override it.
    pub input_size: u32,
    pub execution_provider: ExecutionProvider,
    pub intra_threads: usize,
    /// Base URL `hub://<name>` references resolve against.
    pub hub_base_url: String,
    pub cache_dir: PathBuf,
    pub local_repo_dir: PathBuf,
    pub local_repo_url: String,
    pub history_categories: Vec<HistoryCategory>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: "model/best.onnx".to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            input_size: DEFAULT_INPUT_SIZE,
            execution_provider: ExecutionProvider::Cpu,
            intra_threads: 4,
            hub_base_url: "https://github.com/ultralytics/assets/releases/download/v8.3.0"
                .to_string(),
            cache_dir: PathBuf::from(".cache/skyguard"),
            local_repo_dir: PathBuf::from("vendor/yolov5"),
            local_repo_url: "https://github.com/ultralytics/yolov5.git".to_string(),
            history_categories: vec![
                HistoryCategory::new("soldiers", "soldier"),
                HistoryCategory::new("civilians", "civilian"),
            ],
        }
    }
}

impl InferenceConfig {
    /// Confidence threshold for one request, falling back to the configured
    /// default when the request value is absent or not a probability.
    pub fn effective_threshold(&self, requested: Option<f32>) -> f32 {
        requested
            .filter(|t| t.is_finite() && (0.0..=1.0).contains(t))
            .unwrap_or(self.confidence_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = InferenceConfig::default();
        assert_eq!(config.confidence_threshold, 0.25);
        assert_eq!(config.input_size, 640);
        assert_eq!(config.history_categories.len(), 2);
        assert_eq!(config.history_categories[0].name, "soldiers");
    }

    #[test]
    fn test_partial_deserialization_keeps_defaults() {
        let config: InferenceConfig =
            serde_json::from_str(r#"{"model_path": "m.onnx", "execution_provider": "cuda"}"#)
                .unwrap();
        assert_eq!(config.model_path, "m.onnx");
        assert_eq!(config.execution_provider, ExecutionProvider::Cuda);
        assert_eq!(config.input_size, DEFAULT_INPUT_SIZE);
    }

    #[test]
    fn test_effective_threshold() {
        let config = InferenceConfig::default();
        assert_eq!(config.effective_threshold(None), 0.25);
        assert_eq!(config.effective_threshold(Some(0.6)), 0.6);
        assert_eq!(config.effective_threshold(Some(f32::NAN)), 0.25);
        assert_eq!(config.effective_threshold(Some(1.5)), 0.25);
    }
}

#![allow(dead_code)]

use inference::{EngineLoader, InferenceConfig, ModelMetadata, TensorEngine};
use ndarray::{Array, Array4, ArrayD, IxDyn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Builds one engine per load from a closure over the model path.
pub struct FnLoader<F> {
    make: F,
    pub loads: Arc<AtomicUsize>,
}

impl<F> FnLoader<F>
where
    F: Fn(&Path) -> anyhow::Result<(Box<dyn TensorEngine>, ModelMetadata)> + Send + Sync,
{
    pub fn new(make: F) -> Self {
        Self {
            make,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<F> EngineLoader for FnLoader<F>
where
    F: Fn(&Path) -> anyhow::Result<(Box<dyn TensorEngine>, ModelMetadata)> + Send + Sync,
{
    fn load(&self, path: &Path) -> anyhow::Result<(Box<dyn TensorEngine>, ModelMetadata)> {
        if !path.is_file() {
            anyhow::bail!("no such model file: {}", path.display());
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        (self.make)(path)
    }
}

/// Same tensor on every call.
pub struct FixedEngine(pub ArrayD<f32>);

impl TensorEngine for FixedEngine {
    fn run(&mut self, _input: &Array4<f32>) -> anyhow::Result<ArrayD<f32>> {
        Ok(self.0.clone())
    }
}

/// Answers the warm-up, then fails every request.
pub struct FailAfterWarmUp {
    pub output: ArrayD<f32>,
    pub calls: usize,
}

impl TensorEngine for FailAfterWarmUp {
    fn run(&mut self, _input: &Array4<f32>) -> anyhow::Result<ArrayD<f32>> {
        self.calls += 1;
        if self.calls > 1 {
            anyhow::bail!("device lost");
        }
        Ok(self.output.clone())
    }
}

pub fn tensor(shape: &[usize], data: Vec<f32>) -> ArrayD<f32> {
    Array::from_shape_vec(IxDyn(shape), data).unwrap()
}

pub fn metadata(names: &str) -> ModelMetadata {
    ModelMetadata::default().with("names", names)
}

/// Scratch space with model files and an already-present vendored repo,
/// so no test reaches the network.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("repo")).unwrap();
        Self { dir }
    }

    pub fn model(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"onnx").unwrap();
        path
    }

    pub fn config(&self, model_path: &Path, input_size: u32) -> InferenceConfig {
        InferenceConfig {
            model_path: model_path.to_string_lossy().into_owned(),
            input_size,
            cache_dir: self.dir.path().join("cache"),
            local_repo_dir: self.dir.path().join("repo"),
            local_repo_url: self.dir.path().join("no-remote").to_string_lossy().into_owned(),
            ..InferenceConfig::default()
        }
    }
}

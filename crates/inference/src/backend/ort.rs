use super::{EngineLoader, ModelMetadata, TensorEngine};
use crate::config::ExecutionProvider;
use ndarray::{Array4, ArrayD};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::collections::HashMap;
use std::path::Path;

/// Metadata keys the adapters read from exported models.
const METADATA_KEYS: [&str; 3] = ["names", "stride", "imgsz"];

pub struct OrtEngine {
    session: Session,
}

impl TensorEngine for OrtEngine {
    fn run(&mut self, input: &Array4<f32>) -> anyhow::Result<ArrayD<f32>> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let output = outputs[0].try_extract_array::<f32>()?;
        Ok(output.into_owned())
    }
}

/// Opens `.onnx` files with ONNX Runtime.
#[derive(Debug, Clone, Copy)]
pub struct OrtEngineLoader {
    provider: ExecutionProvider,
    intra_threads: usize,
}

impl OrtEngineLoader {
    pub fn new(provider: ExecutionProvider, intra_threads: usize) -> Self {
        Self {
            provider,
            intra_threads,
        }
    }
}

impl EngineLoader for OrtEngineLoader {
    fn load(&self, path: &Path) -> anyhow::Result<(Box<dyn TensorEngine>, ModelMetadata)> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)?;

        match self.provider {
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])?;
            }
            ExecutionProvider::Cpu => {
                tracing::debug!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_file(path)?;

        let mut custom = HashMap::new();
        {
            let metadata = session.metadata()?;
            for key in METADATA_KEYS {
                if let Some(value) = metadata.custom(key) {
                    custom.insert(key.to_string(), value);
                }
            }
        }

        tracing::info!(path = %path.display(), metadata_keys = custom.len(), "Model session created");
        Ok((Box::new(OrtEngine { session }), ModelMetadata::new(custom)))
    }
}

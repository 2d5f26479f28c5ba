pub mod annotate;
pub mod backend;
pub mod config;
pub mod error;
pub mod history;
pub mod names;
pub mod normalize;
pub mod processing;
pub mod record;
pub mod resolver;
pub mod service;

// Re-export commonly used types for convenience
pub use backend::{
    BackendHandle, BackendVariant, EngineLoader, LoadedModel, ModelMetadata, RawDetectionOutput,
    TensorEngine,
};
pub use config::{ExecutionProvider, InferenceConfig};
pub use error::{InferenceError, MalformedDetection};
pub use history::{HistoryCategory, HistoryStatistics, HistoryStore};
pub use names::ClassNameTable;
pub use normalize::{NormalizeOutcome, normalize};
pub use record::{BoundingBox, DetectionRecord};
pub use resolver::{BackendAdapter, LoadAttempt, LoadAttemptLog, Resolver};
pub use service::{
    BackendDescription, InferenceReport, InferenceService, ResolveReport, default_adapters,
};

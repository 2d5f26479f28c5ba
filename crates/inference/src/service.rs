use crate::{
    annotate::annotate,
    backend::{
        BackendVariant, EngineLoader, HubAdapter, LocalAdapter, PrimaryAdapter, VendoredRepo,
    },
    config::InferenceConfig,
    error::InferenceError,
    history::{HistoryStatistics, HistoryStore},
    names::ClassNameTable,
    normalize::normalize,
    record::DetectionRecord,
    resolver::{BackendAdapter, LoadAttemptLog, Resolver},
};
use chrono::{DateTime, Utc};
use image::RgbImage;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Outcome of a resolve-backend call.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveReport {
    pub success: bool,
    pub backend_variant: Option<BackendVariant>,
    pub model_path: String,
    pub error: Option<String>,
    /// Variants that failed before the winner, or all of them on failure.
    pub attempts: LoadAttemptLog,
}

#[derive(Debug, Clone)]
pub struct InferenceReport {
    pub detections: Vec<DetectionRecord>,
    pub count: usize,
    pub annotated_image: RgbImage,
    /// Set when inference failed and the report was degraded to zero detections.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendDescription {
    pub backend_variant: BackendVariant,
    pub native_type_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_names: Option<ClassNameTable>,
    pub model_path: String,
    pub loaded_at: DateTime<Utc>,
    pub last_load_errors: LoadAttemptLog,
    pub malformed_detections: u64,
}

struct ServiceMetrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    detections: Counter<u64>,
    malformed: Counter<u64>,
    failures: Counter<u64>,
}

fn init_metrics(meter_name: &'static str) -> ServiceMetrics {
    let meter = global::meter(meter_name);
    let latency_buckets = [
        0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0,
    ];

    ServiceMetrics {
        duration: meter
            .f64_histogram("inference_duration_seconds")
            .with_description("Time to serve one detection request (infer + normalize + annotate)")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build(),
        requests: meter
            .u64_counter("inference_requests_total")
            .with_description("Total detection requests served by an active backend")
            .build(),
        detections: meter
            .u64_counter("inference_detections_total")
            .with_description("Total normalized detections produced")
            .build(),
        malformed: meter
            .u64_counter("inference_malformed_detections_total")
            .with_description("Raw detections dropped during normalization")
            .build(),
        failures: meter
            .u64_counter("inference_failures_total")
            .with_description("Requests degraded because the backend failed")
            .build(),
    }
}

/// Default adapter set for a given engine loader, one per variant.
pub fn default_adapters(
    config: &InferenceConfig,
    loader: Arc<dyn EngineLoader>,
) -> Vec<Box<dyn BackendAdapter>> {
    vec![
        Box::new(PrimaryAdapter::new(Arc::clone(&loader), config.input_size)),
        Box::new(HubAdapter::new(
            Arc::clone(&loader),
            config.input_size,
            config.hub_base_url.clone(),
            config.cache_dir.clone(),
        )),
        Box::new(LocalAdapter::new(
            loader,
            config.input_size,
            VendoredRepo::new(config.local_repo_dir.clone(), config.local_repo_url.clone()),
        )),
    ]
}

/// Process-scoped detection service: the resolver's backend slot and the
/// history log, each behind its own lock.
pub struct InferenceService {
    config: InferenceConfig,
    resolver: Resolver,
    history: HistoryStore,
    metrics: ServiceMetrics,
    malformed: AtomicU64,
}

impl InferenceService {
    pub fn new(config: InferenceConfig, adapters: Vec<Box<dyn BackendAdapter>>) -> Self {
        let history = HistoryStore::new(config.history_categories.clone());
        Self {
            resolver: Resolver::new(adapters),
            history,
            metrics: init_metrics("inference"),
            malformed: AtomicU64::new(0),
            config,
        }
    }

    pub fn with_loader(config: InferenceConfig, loader: Arc<dyn EngineLoader>) -> Self {
        let adapters = default_adapters(&config, loader);
        Self::new(config, adapters)
    }

    #[cfg(feature = "ort-backend")]
    pub fn with_onnx_runtime(config: InferenceConfig) -> Self {
        let loader = crate::backend::ort::OrtEngineLoader::new(
            config.execution_provider,
            config.intra_threads,
        );
        Self::with_loader(config, Arc::new(loader))
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// (Re)load a backend. Without a path, the active model's path is reloaded,
    /// or the configured path when nothing is active.
    pub fn resolve_backend(&self, model_path: Option<&str>) -> ResolveReport {
        let model_path = match model_path {
            Some(path) => path.to_string(),
            None => self
                .resolver
                .active()
                .map(|handle| handle.model_path.clone())
                .unwrap_or_else(|| self.config.model_path.clone()),
        };

        tracing::info!(model_path = %model_path, "Resolving backend");

        match self.resolver.resolve(&model_path) {
            Ok(handle) => ResolveReport {
                success: true,
                backend_variant: Some(handle.variant()),
                model_path,
                error: None,
                attempts: self.resolver.last_attempts(),
            },
            Err(log) => ResolveReport {
                success: false,
                backend_variant: None,
                model_path,
                error: Some(InferenceError::BackendLoadFailed(log.clone()).to_string()),
                attempts: log,
            },
        }
    }

    /// Detect objects in `image` with the backend active at call time.
    ///
    /// A backend failure degrades to an empty report carrying the unmodified
    /// image and a warning; only a missing backend is an error.
    #[tracing::instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn run_inference(
        &self,
        image: &RgbImage,
        confidence_threshold: Option<f32>,
    ) -> Result<InferenceReport, InferenceError> {
        let handle = self.resolver.active().ok_or(InferenceError::ModelNotLoaded)?;
        let threshold = self.config.effective_threshold(confidence_threshold);
        let attributes = [KeyValue::new("backend", handle.variant().as_str())];

        let start = Instant::now();
        self.metrics.requests.add(1, &attributes);

        let raw = match handle.model.infer(image, threshold) {
            Ok(raw) => raw,
            Err(e) => {
                let error = InferenceError::InferenceFailed(format!("{e:#}"));
                tracing::warn!(variant = %handle.variant(), error = %error, "Inference failed, returning empty result");
                self.metrics.failures.add(1, &attributes);

                return Ok(InferenceReport {
                    detections: Vec::new(),
                    count: 0,
                    annotated_image: image.clone(),
                    warning: Some(error.to_string()),
                });
            }
        };

        let names = handle.model.class_names();
        let outcome = normalize(&raw, names);

        let dropped = outcome.dropped.len() as u64;
        if dropped > 0 {
            self.malformed.fetch_add(dropped, Ordering::Relaxed);
            self.metrics.malformed.add(dropped, &attributes);
        }

        let annotated_image = annotate(image, &outcome.records, &raw, names);
        self.history.append(&outcome.records);

        let count = outcome.records.len();
        self.metrics.detections.add(count as u64, &attributes);
        self.metrics
            .duration
            .record(start.elapsed().as_secs_f64(), &attributes);

        tracing::debug!(count, dropped, threshold, "Inference complete");

        Ok(InferenceReport {
            detections: outcome.records,
            count,
            annotated_image,
            warning: None,
        })
    }

    pub fn statistics(&self) -> HistoryStatistics {
        self.history.statistics()
    }

    pub fn clear_history(&self) {
        self.history.clear();
        tracing::info!("Detection history cleared");
    }

    pub fn describe_backend(&self) -> Result<BackendDescription, InferenceError> {
        let handle = self.resolver.active().ok_or(InferenceError::ModelNotLoaded)?;
        let class_names = handle.model.class_names();

        Ok(BackendDescription {
            backend_variant: handle.variant(),
            native_type_name: handle.model.native_type_name(),
            class_names: (!class_names.is_empty()).then(|| class_names.clone()),
            model_path: handle.model_path.clone(),
            loaded_at: handle.loaded_at,
            last_load_errors: self.resolver.last_attempts(),
            malformed_detections: self.malformed.load(Ordering::Relaxed),
        })
    }

    pub fn is_model_loaded(&self) -> bool {
        self.resolver.active().is_some()
    }

    pub fn active_variant(&self) -> Option<BackendVariant> {
        self.resolver.active().map(|handle| handle.variant())
    }

    /// Failures of the most recent resolution pass.
    pub fn last_load_errors(&self) -> LoadAttemptLog {
        self.resolver.last_attempts()
    }

    pub fn malformed_detections(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

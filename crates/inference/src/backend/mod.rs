use crate::names::ClassNameTable;
use chrono::{DateTime, Utc};
use image::RgbImage;
use ndarray::{Array4, ArrayD};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub mod fetch;
pub mod hub;
pub mod local;
pub mod paths;
pub mod primary;

#[cfg(feature = "ort-backend")]
pub mod ort;

pub use hub::{HubAdapter, HubModel, HubOutput};
pub use local::{LocalAdapter, LocalDetection, LocalModel, LocalOutput, VendoredRepo};
pub use primary::{PrimaryAdapter, PrimaryBox, PrimaryModel, PrimaryResult};

/// The closed set of detection backends, in resolution priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendVariant {
    Primary,
    Hub,
    Local,
}

impl BackendVariant {
    pub const ALL: [BackendVariant; 3] = [Self::Primary, Self::Hub, Self::Local];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendVariant::Primary => "primary",
            BackendVariant::Hub => "hub",
            BackendVariant::Local => "local",
        }
    }
}

impl std::fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded tensor runtime session.
pub trait TensorEngine: Send {
    /// Run one NCHW batch and return the first output tensor.
    fn run(&mut self, input: &Array4<f32>) -> anyhow::Result<ArrayD<f32>>;
}

/// Opens model files into engines.
pub trait EngineLoader: Send + Sync {
    fn load(&self, path: &Path) -> anyhow::Result<(Box<dyn TensorEngine>, ModelMetadata)>;
}

/// Custom key/value metadata embedded in a model file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelMetadata {
    custom: HashMap<String, String>,
}

impl ModelMetadata {
    pub fn new(custom: HashMap<String, String>) -> Self {
        Self { custom }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.custom.get(key).map(String::as_str)
    }

    /// Parse a numeric entry; exports write `imgsz` as `[640, 640]`.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        let raw = self.get(key)?;
        raw.trim_matches(|c: char| c == '[' || c == ']' || c.is_whitespace())
            .split(',')
            .next()?
            .trim()
            .parse()
            .ok()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.custom.insert(key.to_string(), value.into());
        self
    }
}

/// An engine shared by concurrent requests; one inference at a time.
///
/// ort's `Session::run` takes `&mut self`, so the session sits behind its own
/// mutex. The lock belongs to one handle and is never taken together with the
/// resolver slot or the history lock.
pub(crate) struct SharedEngine(Mutex<Box<dyn TensorEngine>>);

impl SharedEngine {
    pub(crate) fn new(engine: Box<dyn TensorEngine>) -> Self {
        Self(Mutex::new(engine))
    }

    pub(crate) fn run(&self, input: &Array4<f32>) -> anyhow::Result<ArrayD<f32>> {
        let mut engine: MutexGuard<'_, Box<dyn TensorEngine>> = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("engine poisoned by an earlier panic"))?;
        engine.run(input)
    }
}

/// Interleaved pixel order of a native render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// An annotated frame as produced by a backend's own renderer.
#[derive(Debug, Clone)]
pub struct NativeRender {
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    pub pixels: Vec<u8>,
}

impl NativeRender {
    /// Convert to RGB regardless of the renderer's channel order.
    pub fn into_rgb(self) -> Option<RgbImage> {
        let mut pixels = self.pixels;
        if self.order == ChannelOrder::Bgr {
            for px in pixels.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
        }
        RgbImage::from_raw(self.width, self.height, pixels)
    }
}

/// Backend-specific result of one inference call.
#[derive(Debug, Clone)]
pub enum RawDetectionOutput {
    Primary(PrimaryResult),
    Hub(HubOutput),
    Local(LocalOutput),
}

impl RawDetectionOutput {
    pub fn variant(&self) -> BackendVariant {
        match self {
            RawDetectionOutput::Primary(_) => BackendVariant::Primary,
            RawDetectionOutput::Hub(_) => BackendVariant::Hub,
            RawDetectionOutput::Local(_) => BackendVariant::Local,
        }
    }

    /// `(height, width)` of the image the output refers to.
    pub fn orig_shape(&self) -> (u32, u32) {
        match self {
            RawDetectionOutput::Primary(result) => result.orig_shape,
            RawDetectionOutput::Hub(output) => output.orig_shape,
            RawDetectionOutput::Local(output) => output.transform.orig_shape(),
        }
    }
}

/// A fully constructed, inference-ready model of one variant.
pub enum LoadedModel {
    Primary(PrimaryModel),
    Hub(HubModel),
    Local(LocalModel),
}

impl LoadedModel {
    pub fn variant(&self) -> BackendVariant {
        match self {
            LoadedModel::Primary(_) => BackendVariant::Primary,
            LoadedModel::Hub(_) => BackendVariant::Hub,
            LoadedModel::Local(_) => BackendVariant::Local,
        }
    }

    pub fn native_type_name(&self) -> &'static str {
        match self {
            LoadedModel::Primary(_) => std::any::type_name::<PrimaryModel>(),
            LoadedModel::Hub(_) => std::any::type_name::<HubModel>(),
            LoadedModel::Local(_) => std::any::type_name::<LocalModel>(),
        }
    }

    pub fn class_names(&self) -> &ClassNameTable {
        match self {
            LoadedModel::Primary(model) => model.class_names(),
            LoadedModel::Hub(model) => model.class_names(),
            LoadedModel::Local(model) => model.class_names(),
        }
    }

    pub fn infer(&self, image: &RgbImage, threshold: f32) -> anyhow::Result<RawDetectionOutput> {
        Ok(match self {
            LoadedModel::Primary(model) => RawDetectionOutput::Primary(model.infer(image, threshold)?),
            LoadedModel::Hub(model) => RawDetectionOutput::Hub(model.infer(image, threshold)?),
            LoadedModel::Local(model) => RawDetectionOutput::Local(model.infer(image, threshold)?),
        })
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("variant", &self.variant())
            .field("classes", &self.class_names().len())
            .finish()
    }
}

/// The active backend: which variant won, the model it owns, and where it came from.
#[derive(Debug)]
pub struct BackendHandle {
    pub model: LoadedModel,
    pub model_path: String,
    pub loaded_at: DateTime<Utc>,
}

impl BackendHandle {
    pub fn new(model: LoadedModel, model_path: impl Into<String>) -> Self {
        Self {
            model,
            model_path: model_path.into(),
            loaded_at: Utc::now(),
        }
    }

    pub fn variant(&self) -> BackendVariant {
        self.model.variant()
    }
}

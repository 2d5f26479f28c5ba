use super::paths::{hub_reference, normalize_model_path};
use super::{
    BackendVariant, ChannelOrder, EngineLoader, LoadedModel, ModelMetadata, NativeRender,
    SharedEngine,
};
use crate::annotate::draw::{draw_labeled_box, palette_color};
use crate::names::ClassNameTable;
use crate::processing::post::decode_channels_first;
use crate::processing::pre::DEFAULT_STRIDE;
use crate::processing::{Letterbox, OutputLayout, non_max_suppression};
use crate::resolver::BackendAdapter;
use anyhow::Context;
use image::{Rgb, RgbImage};
use std::sync::Arc;

pub const PRIMARY_IOU_THRESHOLD: f32 = 0.7;
pub const MAX_DETECTIONS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimaryBox {
    pub cls: usize,
    pub conf: f32,
    /// Source-image pixels.
    pub xyxy: [f32; 4],
}

/// Self-describing result of a primary export: boxes, the class-name table
/// they index, and a renderer.
#[derive(Debug, Clone)]
pub struct PrimaryResult {
    pub boxes: Vec<PrimaryBox>,
    /// `(height, width)` of the source image.
    pub orig_shape: (u32, u32),
    pub names: Arc<ClassNameTable>,
}

impl PrimaryResult {
    /// Draw every box with its class color and return the frame as BGR.
    pub fn plot(&self, image: &RgbImage) -> NativeRender {
        let mut canvas = image.clone();
        for b in &self.boxes {
            let label = match self.names.get(b.cls) {
                Some(name) => format!("{name} {:.2}", b.conf),
                None => format!("{} {:.2}", b.cls, b.conf),
            };
            draw_labeled_box(&mut canvas, b.xyxy, &label, palette_color(b.cls), Rgb([255, 255, 255]));
        }

        let (width, height) = canvas.dimensions();
        let mut pixels = canvas.into_raw();
        for px in pixels.chunks_exact_mut(3) {
            px.swap(0, 2);
        }

        NativeRender {
            width,
            height,
            order: ChannelOrder::Bgr,
            pixels,
        }
    }
}

pub struct PrimaryModel {
    engine: SharedEngine,
    names: Arc<ClassNameTable>,
    letterbox: Letterbox,
}

impl PrimaryModel {
    pub fn class_names(&self) -> &ClassNameTable {
        &self.names
    }

    pub fn infer(&self, image: &RgbImage, threshold: f32) -> anyhow::Result<PrimaryResult> {
        let (input, transform) = self.letterbox.apply(image)?;
        let output = self.engine.run(&input)?;

        let candidates = decode_channels_first(&output, self.names.class_count(), threshold)?;
        let kept = non_max_suppression(candidates, PRIMARY_IOU_THRESHOLD, MAX_DETECTIONS);

        let boxes = kept
            .into_iter()
            .map(|c| PrimaryBox {
                cls: c.cls,
                conf: c.conf,
                xyxy: transform.to_source(c.xyxy),
            })
            .collect();

        Ok(PrimaryResult {
            boxes,
            orig_shape: transform.orig_shape(),
            names: Arc::clone(&self.names),
        })
    }
}

/// Loads `.onnx` exports that embed their class names in model metadata.
pub struct PrimaryAdapter {
    loader: Arc<dyn EngineLoader>,
    input_size: u32,
}

impl PrimaryAdapter {
    pub fn new(loader: Arc<dyn EngineLoader>, input_size: u32) -> Self {
        Self { loader, input_size }
    }
}

impl BackendAdapter for PrimaryAdapter {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Primary
    }

    fn load(&self, model_path: &str) -> anyhow::Result<LoadedModel> {
        if hub_reference(model_path).is_some() {
            anyhow::bail!("hub references are not self-describing exports");
        }

        let path = normalize_model_path(model_path);
        if path.extension().and_then(|e| e.to_str()) != Some("onnx") {
            anyhow::bail!("{} is not an .onnx export", path.display());
        }
        if !path.is_file() {
            anyhow::bail!("model file {} does not exist", path.display());
        }

        let (engine, metadata) = self
            .loader
            .load(&path)
            .with_context(|| format!("opening {}", path.display()))?;

        let names = metadata
            .get("names")
            .context("model metadata carries no class names")?;
        let names = ClassNameTable::parse(names).context("parsing metadata class names")?;

        let model = PrimaryModel {
            engine: SharedEngine::new(engine),
            names: Arc::new(names),
            letterbox: letterbox_for(&metadata, self.input_size),
        };
        warm_up(&model)?;

        tracing::info!(
            path = %path.display(),
            classes = model.names.len(),
            input_size = model.letterbox.input_size(),
            "Primary export loaded"
        );
        Ok(LoadedModel::Primary(model))
    }
}

/// Input geometry declared by the export, else the configured default.
pub(crate) fn letterbox_for(metadata: &ModelMetadata, input_size: u32) -> Letterbox {
    Letterbox::new(
        metadata.get_u32("imgsz").unwrap_or(input_size),
        metadata.get_u32("stride").unwrap_or(DEFAULT_STRIDE),
    )
}

fn warm_up(model: &PrimaryModel) -> anyhow::Result<()> {
    let output = model
        .engine
        .run(&model.letterbox.blank_input()?)
        .context("warm-up inference failed")?;
    OutputLayout::ChannelsFirst {
        classes: model.names.class_count(),
    }
    .check(output.shape())
}

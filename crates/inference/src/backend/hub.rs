use super::fetch::fetch_hub_model;
use super::paths::{hub_reference, normalize_model_path};
use super::primary::letterbox_for;
use super::{BackendVariant, ChannelOrder, EngineLoader, LoadedModel, NativeRender, SharedEngine};
use crate::annotate::draw::{draw_labeled_box, palette_color};
use crate::names::ClassNameTable;
use crate::processing::post::decode_end_to_end;
use crate::processing::{Letterbox, OutputLayout};
use crate::resolver::BackendAdapter;
use anyhow::Context;
use image::{Rgb, RgbImage};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Rows of `x1, y1, x2, y2, conf, cls` in source-image pixels.
#[derive(Debug, Clone)]
pub struct HubOutput {
    pub rows: Array2<f32>,
    /// `(height, width)` of the source image.
    pub orig_shape: (u32, u32),
}

impl HubOutput {
    /// Draw every row onto a copy of `image`, returned as RGB.
    pub fn render(&self, image: &RgbImage, names: &ClassNameTable) -> NativeRender {
        let mut canvas = image.clone();

        for row in self.rows.rows() {
            if row.len() < 6 {
                continue;
            }
            let cls = row[5];
            let class_id = (cls >= 0.0 && cls.fract() == 0.0).then_some(cls as usize);
            let label = match class_id.and_then(|id| names.get(id)) {
                Some(name) => format!("{name} {:.2}", row[4]),
                None => format!("{cls} {:.2}", row[4]),
            };
            draw_labeled_box(
                &mut canvas,
                [row[0], row[1], row[2], row[3]],
                &label,
                palette_color(class_id.unwrap_or(0)),
                Rgb([255, 255, 255]),
            );
        }

        let (width, height) = canvas.dimensions();
        NativeRender {
            width,
            height,
            order: ChannelOrder::Rgb,
            pixels: canvas.into_raw(),
        }
    }
}

pub struct HubModel {
    engine: SharedEngine,
    names: ClassNameTable,
    letterbox: Letterbox,
}

impl HubModel {
    pub fn class_names(&self) -> &ClassNameTable {
        &self.names
    }

    pub fn infer(&self, image: &RgbImage, threshold: f32) -> anyhow::Result<HubOutput> {
        let (input, transform) = self.letterbox.apply(image)?;
        let output = self.engine.run(&input)?;
        let rows = decode_end_to_end(&output, threshold, &transform)?;

        Ok(HubOutput {
            rows,
            orig_shape: transform.orig_shape(),
        })
    }
}

/// Loads end-to-end exports, fetching `hub://<name>` references into the cache first.
pub struct HubAdapter {
    loader: Arc<dyn EngineLoader>,
    input_size: u32,
    base_url: String,
    cache_dir: PathBuf,
}

impl HubAdapter {
    pub fn new(
        loader: Arc<dyn EngineLoader>,
        input_size: u32,
        base_url: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            loader,
            input_size,
            base_url: base_url.into(),
            cache_dir: cache_dir.into(),
        }
    }

    fn locate(&self, model_path: &str) -> anyhow::Result<PathBuf> {
        if let Some(name) = hub_reference(model_path) {
            return fetch_hub_model(&self.base_url, name, &self.cache_dir);
        }

        let path = normalize_model_path(model_path);
        if !path.is_file() {
            anyhow::bail!("model file {} does not exist", path.display());
        }
        Ok(path)
    }
}

impl BackendAdapter for HubAdapter {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Hub
    }

    fn load(&self, model_path: &str) -> anyhow::Result<LoadedModel> {
        let path = self.locate(model_path)?;

        let (engine, metadata) = self
            .loader
            .load(&path)
            .with_context(|| format!("opening {}", path.display()))?;

        let names = match metadata.get("names") {
            Some(raw) => ClassNameTable::parse(raw).context("parsing metadata class names")?,
            None => sidecar_names(&path)?,
        };

        let model = HubModel {
            engine: SharedEngine::new(engine),
            names,
            letterbox: letterbox_for(&metadata, self.input_size),
        };

        let output = model
            .engine
            .run(&model.letterbox.blank_input()?)
            .context("warm-up inference failed")?;
        OutputLayout::EndToEnd.check(output.shape())?;

        tracing::info!(path = %path.display(), classes = model.names.len(), "Hub export loaded");
        Ok(LoadedModel::Hub(model))
    }
}

/// `<stem>.names.json` next to the model.
fn sidecar_names(model: &Path) -> anyhow::Result<ClassNameTable> {
    let sidecar = model.with_extension("names.json");
    let raw = std::fs::read_to_string(&sidecar).with_context(|| {
        format!(
            "model metadata carries no class names and {} is unreadable",
            sidecar.display()
        )
    })?;
    Ok(ClassNameTable::parse(&raw)?)
}

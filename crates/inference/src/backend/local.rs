use super::fetch::ensure_repository;
use super::paths::{hub_reference, normalize_model_path};
use super::primary::{MAX_DETECTIONS, letterbox_for};
use super::{BackendVariant, EngineLoader, LoadedModel, SharedEngine};
use crate::names::ClassNameTable;
use crate::processing::post::decode_objectness;
use crate::processing::{Letterbox, OutputLayout, TransformParams, non_max_suppression};
use crate::resolver::BackendAdapter;
use anyhow::Context;
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;

pub const LOCAL_IOU_THRESHOLD: f32 = 0.45;

/// A detector repository checked out on disk, cloned on first use.
#[derive(Debug, Clone)]
pub struct VendoredRepo {
    pub dir: PathBuf,
    pub url: String,
}

impl VendoredRepo {
    pub fn new(dir: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url: url.into(),
        }
    }

    pub fn ensure(&self) -> anyhow::Result<()> {
        ensure_repository(&self.url, &self.dir)
    }

    /// Class names shipped with the repository, if any.
    fn names(&self) -> anyhow::Result<Option<ClassNameTable>> {
        let json = self.dir.join("names.json");
        if json.is_file() {
            let raw = std::fs::read_to_string(&json)?;
            return Ok(Some(
                ClassNameTable::parse(&raw).with_context(|| format!("parsing {}", json.display()))?,
            ));
        }

        let txt = self.dir.join("names.txt");
        if txt.is_file() {
            let raw = std::fs::read_to_string(&txt)?;
            return Ok(Some(
                ClassNameTable::from_lines(&raw)
                    .with_context(|| format!("parsing {}", txt.display()))?,
            ));
        }

        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalDetection {
    /// Source-image pixels.
    pub xyxy: [f32; 4],
    pub conf: f32,
    pub cls: usize,
}

/// Post-NMS detections plus the letterbox they were decoded through.
#[derive(Debug, Clone)]
pub struct LocalOutput {
    pub detections: Vec<LocalDetection>,
    pub transform: TransformParams,
}

pub struct LocalModel {
    engine: SharedEngine,
    names: ClassNameTable,
    letterbox: Letterbox,
}

impl LocalModel {
    pub fn class_names(&self) -> &ClassNameTable {
        &self.names
    }

    /// Letterbox, run, suppress at IoU 0.45, then map back to source pixels.
    pub fn infer(&self, image: &RgbImage, threshold: f32) -> anyhow::Result<LocalOutput> {
        let (input, transform) = self.letterbox.apply(image)?;
        let output = self.engine.run(&input)?;

        let candidates = decode_objectness(&output, self.names.class_count(), threshold)?;
        let detections = non_max_suppression(candidates, LOCAL_IOU_THRESHOLD, MAX_DETECTIONS)
            .into_iter()
            .map(|c| LocalDetection {
                xyxy: transform.to_source(c.xyxy),
                conf: c.conf,
                cls: c.cls,
            })
            .collect();

        Ok(LocalOutput {
            detections,
            transform,
        })
    }
}

/// Loads objectness-style exports alongside a vendored detector repository.
pub struct LocalAdapter {
    loader: Arc<dyn EngineLoader>,
    input_size: u32,
    repo: VendoredRepo,
}

impl LocalAdapter {
    pub fn new(loader: Arc<dyn EngineLoader>, input_size: u32, repo: VendoredRepo) -> Self {
        Self {
            loader,
            input_size,
            repo,
        }
    }

    /// The path as given, or relative to the repository when only that exists.
    fn locate(&self, model_path: &str) -> anyhow::Result<PathBuf> {
        let path = normalize_model_path(model_path);
        if path.is_file() {
            return Ok(path);
        }
        if path.is_relative() {
            let in_repo = self.repo.dir.join(&path);
            if in_repo.is_file() {
                return Ok(in_repo);
            }
        }
        anyhow::bail!(
            "model file {} not found directly or under {}",
            path.display(),
            self.repo.dir.display()
        )
    }
}

impl BackendAdapter for LocalAdapter {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Local
    }

    fn load(&self, model_path: &str) -> anyhow::Result<LoadedModel> {
        if hub_reference(model_path).is_some() {
            anyhow::bail!("hub references are not served from the vendored repository");
        }

        self.repo.ensure().context("materializing vendored repository")?;
        let path = self.locate(model_path)?;

        let (engine, metadata) = self
            .loader
            .load(&path)
            .with_context(|| format!("opening {}", path.display()))?;

        let names = match metadata.get("names") {
            Some(raw) => Some(ClassNameTable::parse(raw).context("parsing metadata class names")?),
            None => self.repo.names()?,
        };

        let letterbox = letterbox_for(&metadata, self.input_size);
        let engine = SharedEngine::new(engine);
        let output = engine
            .run(&letterbox.blank_input()?)
            .context("warm-up inference failed")?;

        let names = match names {
            Some(names) => names,
            None => generated_names(output.shape())?,
        };
        OutputLayout::Objectness {
            classes: names.class_count(),
        }
        .check(output.shape())?;

        tracing::info!(
            path = %path.display(),
            repo = %self.repo.dir.display(),
            classes = names.len(),
            "Local export loaded"
        );
        Ok(LoadedModel::Local(LocalModel {
            engine,
            names,
            letterbox,
        }))
    }
}

/// `class0 .. classN` sized from a `[1, N, 5 + nc]` output.
fn generated_names(shape: &[usize]) -> anyhow::Result<ClassNameTable> {
    match shape {
        [1, _, cols] if *cols > 5 => Ok(ClassNameTable::Sequence(
            (0..cols - 5).map(|i| format!("class{i}")).collect(),
        )),
        _ => anyhow::bail!("no class names available and output shape {shape:?} is not [1, N, 5 + nc]"),
    }
}

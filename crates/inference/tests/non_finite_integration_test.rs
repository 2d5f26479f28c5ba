mod support;

use image::RgbImage;
use inference::backend::{HubAdapter, LocalAdapter, PrimaryAdapter, VendoredRepo};
use inference::{
    BackendAdapter, BackendVariant, EngineLoader, InferenceService, LoadedModel,
    MalformedDetection, TensorEngine, normalize,
};
use ndarray::ArrayD;
use std::sync::Arc;
use support::{FixedEngine, FnLoader, Workspace, metadata, tensor};

fn loader(output: ArrayD<f32>) -> Arc<dyn EngineLoader> {
    Arc::new(FnLoader::new(move |_path| {
        let engine: Box<dyn TensorEngine> = Box::new(FixedEngine(output.clone()));
        Ok((engine, metadata(r#"["target"]"#)))
    }))
}

/// Runs the model on a 64x64 frame (identity letterbox at input 64) and
/// checks that only the finite detection survives normalization.
fn assert_only_finite_box_survives(model: LoadedModel, expected: [f32; 4]) {
    let raw = model.infer(&RgbImage::new(64, 64), 0.25).unwrap();
    let outcome = normalize(&raw, model.class_names());

    assert_eq!(outcome.records.len(), 1, "{:?}", outcome.records);
    let got: [f32; 4] = outcome.records[0].bbox().into();
    assert_eq!(got, expected);

    assert_eq!(outcome.dropped.len(), 1);
    assert!(matches!(outcome.dropped[0], MalformedDetection::NonFiniteBox(_)));
}

#[test]
fn test_primary_drops_nan_coordinates() {
    let ws = Workspace::new();
    let model = ws.model("primary.onnx");
    // [1, 4 + 1, 2], channel-major: cx, cy, w, h, score for two anchors
    let output = tensor(
        &[1, 5, 2],
        vec![
            f32::NAN, 40.0, //
            10.0, 40.0, //
            8.0, 10.0, //
            8.0, 10.0, //
            0.9, 0.8,
        ],
    );

    let model = PrimaryAdapter::new(loader(output), 64)
        .load(model.to_str().unwrap())
        .unwrap();
    assert_eq!(model.variant(), BackendVariant::Primary);
    assert_only_finite_box_survives(model, [35.0, 35.0, 45.0, 45.0]);
}

#[test]
fn test_hub_drops_nan_coordinates() {
    let ws = Workspace::new();
    let model = ws.model("hub.onnx");
    let output = tensor(
        &[1, 2, 6],
        vec![
            f32::NAN, 4.0, 20.0, 20.0, 0.9, 0.0, //
            30.0, 30.0, 50.0, 50.0, 0.8, 0.0,
        ],
    );

    let model = HubAdapter::new(loader(output), 64, "http://127.0.0.1:9", ws.dir.path().join("cache"))
        .load(model.to_str().unwrap())
        .unwrap();
    assert_eq!(model.variant(), BackendVariant::Hub);
    assert_only_finite_box_survives(model, [30.0, 30.0, 50.0, 50.0]);
}

#[test]
fn test_local_drops_infinite_coordinates() {
    let ws = Workspace::new();
    let model = ws.model("local.onnx");
    // cx, cy, w, h, objectness, class score
    let output = tensor(
        &[1, 2, 6],
        vec![
            10.0, 10.0, f32::INFINITY, 8.0, 0.9, 1.0, //
            40.0, 40.0, 10.0, 10.0, 0.9, 1.0,
        ],
    );

    let repo = VendoredRepo::new(ws.dir.path().join("repo"), "unused");
    let model = LocalAdapter::new(loader(output), 64, repo)
        .load(model.to_str().unwrap())
        .unwrap();
    assert_eq!(model.variant(), BackendVariant::Local);
    assert_only_finite_box_survives(model, [35.0, 35.0, 45.0, 45.0]);
}

#[test]
fn test_non_finite_box_never_reaches_history() {
    let ws = Workspace::new();
    let model = ws.model("hub.onnx");
    let output = tensor(
        &[1, 2, 6],
        vec![
            f32::NAN, f32::NAN, f32::NAN, f32::NAN, 0.9, 0.0, //
            30.0, 30.0, 50.0, 50.0, 0.8, 0.0,
        ],
    );
    let service = InferenceService::with_loader(ws.config(&model, 64), loader(output));
    assert_eq!(service.resolve_backend(None).backend_variant, Some(BackendVariant::Hub));

    let report = service.run_inference(&RgbImage::new(64, 64), None).unwrap();
    assert_eq!(report.count, 1);

    let stats = service.statistics();
    assert_eq!(stats.total, 1);
    assert!(stats.recent.iter().all(|r| r.bbox().is_finite()));
    assert_eq!(service.malformed_detections(), 1);
}

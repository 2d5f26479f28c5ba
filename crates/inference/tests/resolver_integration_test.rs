mod support;

use inference::backend::{HubAdapter, LocalAdapter, PrimaryAdapter, VendoredRepo};
use inference::{
    BackendAdapter, BackendVariant, EngineLoader, InferenceService, Resolver, TensorEngine,
};
use std::sync::Arc;
use support::{FixedEngine, FnLoader, Workspace, metadata, tensor};

/// `[1, 6, 6]` with two classes satisfies both the channels-first and the
/// end-to-end layout checks, so primary and hub can both open it.
fn ambiguous_loader() -> Arc<dyn EngineLoader> {
    Arc::new(FnLoader::new(|_path| {
        let engine: Box<dyn TensorEngine> = Box::new(FixedEngine(tensor(&[1, 6, 6], vec![0.0; 36])));
        Ok((engine, metadata(r#"["soldier", "civilian"]"#)))
    }))
}

#[test]
fn test_priority_order_wins_when_several_variants_succeed() {
    let ws = Workspace::new();
    let model = ws.model("both.onnx");
    let model = model.to_str().unwrap();
    let loader = ambiguous_loader();

    let hub = HubAdapter::new(loader.clone(), 64, "http://127.0.0.1:9", ws.dir.path().join("cache"));
    assert!(hub.load(model).is_ok(), "hub must be able to load the model on its own");

    // Registration order is irrelevant
    let resolver = Resolver::new(vec![
        Box::new(hub),
        Box::new(PrimaryAdapter::new(loader.clone(), 64)),
    ]);

    for _ in 0..3 {
        let handle = resolver.resolve(model).unwrap();
        assert_eq!(handle.variant(), BackendVariant::Primary);
        assert!(resolver.last_attempts().is_empty());
    }
}

#[test]
fn test_fallback_records_failures_before_winner() {
    let ws = Workspace::new();
    let model = ws.model("e2e.onnx");
    let loader: Arc<dyn EngineLoader> = Arc::new(FnLoader::new(|_path| {
        let engine: Box<dyn TensorEngine> =
            Box::new(FixedEngine(tensor(&[1, 300, 6], vec![0.0; 1800])));
        Ok((engine, metadata(r#"["soldier", "civilian"]"#)))
    }));

    let resolver = Resolver::new(vec![
        Box::new(PrimaryAdapter::new(loader.clone(), 64)),
        Box::new(HubAdapter::new(loader.clone(), 64, "http://127.0.0.1:9", ws.dir.path().join("cache"))),
        Box::new(LocalAdapter::new(
            loader,
            64,
            VendoredRepo::new(ws.dir.path().join("repo"), "unused"),
        )),
    ]);

    let handle = resolver.resolve(model.to_str().unwrap()).unwrap();
    assert_eq!(handle.variant(), BackendVariant::Hub);

    let attempts = resolver.last_attempts();
    assert_eq!(attempts.attempts().len(), 1);
    assert_eq!(attempts.attempts()[0].variant, BackendVariant::Primary);
    assert!(attempts.attempts()[0].error.contains("does not match"));
}

#[test]
fn test_exhausted_resolution_lists_every_variant_in_order() {
    let ws = Workspace::new();
    let loader = ambiguous_loader();
    let config = ws.config(&ws.dir.path().join("missing.onnx"), 64);
    let service = InferenceService::with_loader(config, loader);

    let report = service.resolve_backend(None);
    assert!(!report.success);
    assert_eq!(report.backend_variant, None);

    let variants: Vec<_> = report.attempts.attempts().iter().map(|a| a.variant).collect();
    assert_eq!(variants, BackendVariant::ALL);

    let error = report.error.unwrap();
    assert!(error.starts_with("All backends failed to load: primary: "));
    assert!(error.contains("; hub: "));
    assert!(error.contains("; local: "));
}

#[test]
fn test_failed_reload_keeps_previous_backend_servable() {
    let ws = Workspace::new();
    let model = ws.model("good.onnx");
    let config = ws.config(&model, 64);
    let service = InferenceService::with_loader(config, ambiguous_loader());

    assert!(service.resolve_backend(None).success);
    let before = service.describe_backend().unwrap();

    let report = service.resolve_backend(Some("definitely/not/here.onnx"));
    assert!(!report.success);
    assert_eq!(report.model_path, "definitely/not/here.onnx");

    let after = service.describe_backend().unwrap();
    assert_eq!(after.backend_variant, before.backend_variant);
    assert_eq!(after.model_path, before.model_path);
    assert_eq!(after.loaded_at, before.loaded_at);
    assert_eq!(after.last_load_errors.attempts().len(), 3);

    let image = image::RgbImage::new(32, 32);
    assert!(service.run_inference(&image, None).is_ok());
}

#[test]
fn test_reload_without_path_reuses_active_model() {
    let ws = Workspace::new();
    let first = ws.model("first.onnx");
    let second = ws.model("second.onnx");
    let service = InferenceService::with_loader(ws.config(&first, 64), ambiguous_loader());

    assert!(service.resolve_backend(Some(second.to_str().unwrap())).success);
    let report = service.resolve_backend(None);
    assert!(report.success);
    assert_eq!(report.model_path, second.to_str().unwrap());
}

#[test]
fn test_inference_during_reload_sees_a_whole_handle() {
    let ws = Workspace::new();
    let model = ws.model("good.onnx");
    let service = Arc::new(InferenceService::with_loader(ws.config(&model, 64), ambiguous_loader()));
    assert!(service.resolve_backend(None).success);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                let image = image::RgbImage::new(16, 16);
                for _ in 0..25 {
                    let report = service.run_inference(&image, None).unwrap();
                    assert!(report.warning.is_none());
                }
            })
        })
        .collect();

    for i in 0..10 {
        let path = if i % 2 == 0 { "missing.onnx" } else { model.to_str().unwrap() };
        service.resolve_backend(Some(path));
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert!(service.is_model_loaded());
}

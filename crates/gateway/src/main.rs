use gateway::{config::get_configuration, logging::setup_logging, run_server, AppState};
use inference::InferenceService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_configuration().expect("failed to load configuration");
    let _telemetry = setup_logging(&config)?;

    tracing::info!(
        environment = config.environment.as_str(),
        model_path = %config.inference.model_path,
        provider = ?config.inference.execution_provider,
        "SkyGuard gateway starting"
    );

    let state = AppState::new(
        InferenceService::with_onnx_runtime(config.inference.clone()),
        config.server.jpeg_quality,
    );

    // Serve even without a model; /api/reload-model can recover later
    let service = state.service.clone();
    let report = tokio::task::spawn_blocking(move || service.resolve_backend(None)).await?;
    match (&report.backend_variant, &report.error) {
        (Some(variant), _) => {
            tracing::info!(backend = %variant, model_path = %report.model_path, "Model loaded")
        }
        (None, error) => tracing::error!(
            model_path = %report.model_path,
            error = error.as_deref().unwrap_or("unknown"),
            "No backend could load the model"
        ),
    }

    run_server(&config.server, state).await
}

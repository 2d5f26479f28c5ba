use crate::codec;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use inference::{BackendDescription, BackendVariant, DetectionRecord, HistoryStatistics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    pub image: Option<String>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub success: bool,
    pub detections: Vec<DetectionRecord>,
    pub count: usize,
    pub annotated_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReloadRequest {
    pub model_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    backend: Option<BackendVariant>,
    timestamp: DateTime<Utc>,
}

/// Category counts appear both as top-level keys (`soldiers`, `civilians`)
/// and under `categories`.
#[derive(Debug, Serialize)]
struct StatisticsResponse {
    total: usize,
    #[serde(flatten)]
    counts: BTreeMap<String, usize>,
    categories: BTreeMap<String, usize>,
    recent: Vec<DetectionRecord>,
}

impl From<HistoryStatistics> for StatisticsResponse {
    fn from(stats: HistoryStatistics) -> Self {
        Self {
            total: stats.total,
            counts: stats.per_category.clone(),
            categories: stats.per_category,
            recent: stats.recent,
        }
    }
}

#[derive(Debug, Serialize)]
struct ModelInfoResponse {
    success: bool,
    #[serde(flatten)]
    description: BackendDescription,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/detect/image", post(detect))
        .route("/api/detect/video-frame", post(detect))
        .route("/api/statistics", get(statistics))
        .route("/api/clear-history", post(clear_history))
        .route("/api/model-info", get(model_info))
        .route("/api/reload-model", post(reload_model))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(config: &ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    let address = config.address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(%address, "HTTP server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running",
        model_loaded: state.service.is_model_loaded(),
        backend: state.service.active_variant(),
        timestamp: Utc::now(),
    })
}

/// Shared by the image and video-frame routes.
async fn detect(
    State(state): State<AppState>,
    Json(request): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    if !state.service.is_model_loaded() {
        return Err(inference::InferenceError::ModelNotLoaded.into());
    }
    let payload = request
        .image
        .filter(|image| !image.is_empty())
        .ok_or(ApiError::MissingImage)?;

    let service = state.service.clone();
    let quality = state.jpeg_quality;
    let response = tokio::task::spawn_blocking(move || -> Result<DetectResponse, ApiError> {
        let image = codec::decode_image(&payload)?;
        let report = service.run_inference(&image, request.confidence)?;
        let annotated_image = codec::encode_data_url(&report.annotated_image, quality)
            .map_err(|e| ApiError::Internal(format!("JPEG encoding failed: {e:#}")))?;

        Ok(DetectResponse {
            success: true,
            detections: report.detections,
            count: report.count,
            annotated_image,
            warning: report.warning,
        })
    })
    .await??;

    Ok(Json(response))
}

async fn statistics(State(state): State<AppState>) -> Json<StatisticsResponse> {
    Json(state.service.statistics().into())
}

async fn clear_history(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.service.clear_history();
    Json(serde_json::json!({ "success": true, "message": "History cleared" }))
}

async fn model_info(State(state): State<AppState>) -> Result<Json<ModelInfoResponse>, ApiError> {
    let description = state.service.describe_backend()?;
    Ok(Json(ModelInfoResponse {
        success: true,
        description,
    }))
}

/// Body is optional; an empty or absent `model_path` reloads the active model.
async fn reload_model(
    State(state): State<AppState>,
    request: Option<Json<ReloadRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let model_path = request
        .and_then(|Json(request)| request.model_path)
        .filter(|path| !path.trim().is_empty());

    let service = state.service.clone();
    let report =
        tokio::task::spawn_blocking(move || service.resolve_backend(model_path.as_deref())).await?;

    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(report)))
}

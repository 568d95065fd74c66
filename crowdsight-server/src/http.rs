// HTTP API: health, live WebSocket, single-image detection, video jobs, threshold

use crate::dispatch::DispatchScheduler;
use crate::error::ServerError;
use crate::hub::ViewerHub;
use crate::live::{image_data_url, jpeg_data_url, LiveFrameProcessor};
use crate::websocket::ws_handler;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use crowdsight_core::{CrowdsightConfig, Error as CoreError, FrameResult};
use crowdsight_eye::{render_dots, Detector, MediaTool, PipelineSettings, VideoPipeline, VideoReport, VisionError};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CrowdsightConfig>,
    pub hub: Arc<ViewerHub>,
    pub scheduler: Arc<DispatchScheduler>,
    pub detector: Arc<dyn Detector>,
    pub media: Arc<dyn MediaTool>,
}

impl AppState {
    /// Wire the viewer hub and live scheduler around `detector`
    pub fn new(config: CrowdsightConfig, detector: Arc<dyn Detector>, media: Arc<dyn MediaTool>) -> Self {
        let hub = Arc::new(ViewerHub::new(config.server.max_viewers));
        let processor = Arc::new(LiveFrameProcessor::new(detector.clone()));
        let scheduler = Arc::new(DispatchScheduler::new(
            &config.dispatch,
            &config.alert,
            processor,
            hub.clone(),
        ));
        Self {
            config: Arc::new(config),
            hub,
            scheduler,
            detector,
            media,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ThresholdRequest {
    pub threshold: u32,
}

/// Create HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let output_dir = state.config.video.output_dir.clone();
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/detect", post(detect_handler))
        .route("/api/video", post(video_handler))
        .route("/api/threshold", get(get_threshold_handler).post(set_threshold_handler))
        // finished videos
        .nest_service("/outputs", ServeDir::new(output_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .map_response(IntoResponse::into_response)
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(body_limit)),
        )
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "viewers": state.hub.len(),
        "inFlight": state.scheduler.in_flight(),
        "pending": state.scheduler.pending(),
        "concurrencyLimit": state.scheduler.concurrency_limit(),
        "capacityLimit": state.scheduler.capacity_limit(),
        "threshold": state.scheduler.threshold(),
    }))
}

/// Single image, detected and annotated synchronously. Bypasses the live scheduler.
async fn detect_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<JsonValue>, ServerError> {
    if body.is_empty() {
        return Err(ServerError::BadRequest("No image uploaded".to_string()));
    }

    let result = state.detector.infer(&body).await?;
    let frame = body.to_vec();
    let detections = result.detections.clone();
    let annotated = tokio::task::spawn_blocking(move || render_dots(&frame, &detections))
        .await
        .map_err(|e| VisionError::Render(format!("render task failed: {}", e)))?;

    info!("Single image processed: {} people", result.count);
    Ok(Json(json!({
        "success": true,
        "count": result.count,
        "annotatedImage": jpeg_data_url(&annotated),
        "predictions": result.detections,
        "originalImage": image_data_url(&body),
    })))
}

/// Whole-video job. The job runs on its own task, so it finishes and
/// cleans up even if the client goes away first.
async fn video_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<JsonValue>, ServerError> {
    if body.is_empty() {
        return Err(ServerError::BadRequest("No video uploaded".to_string()));
    }

    let video = &state.config.video;
    let job_id = Uuid::new_v4();
    let work_dir = video.work_dir.join(job_id.to_string());
    let output = video.output_dir.join(format!("{}.mp4", job_id));
    let pipeline = VideoPipeline::new(state.detector.clone(), state.media.clone(), PipelineSettings::from(video));

    info!("🎬 Video job {} started ({} bytes)", job_id, body.len());
    let report = tokio::spawn(run_video_job(pipeline, body, work_dir, output))
        .await
        .map_err(|e| CoreError::Processing(format!("video job {} aborted: {}", job_id, e)))??;

    let results: Vec<_> = report.results.iter().map(FrameResult::summary).collect();
    Ok(Json(json!({
        "success": true,
        "annotatedVideo": format!("/outputs/{}.mp4", job_id),
        "totalFrames": report.total_frames(),
        "validFrames": report.valid_frames(),
        "results": results,
        "statistics": report.statistics,
    })))
}

/// Scratch files live under `work_dir` and are removed whether or not the
/// job succeeds.
async fn run_video_job(
    pipeline: VideoPipeline,
    body: Bytes,
    work_dir: PathBuf,
    output: PathBuf,
) -> Result<VideoReport, ServerError> {
    let outcome = stage_and_run(&pipeline, &body, &work_dir, &output).await;
    if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
        warn!("Failed to clean up {}: {}", work_dir.display(), e);
    }
    outcome
}

async fn stage_and_run(
    pipeline: &VideoPipeline,
    body: &[u8],
    work_dir: &Path,
    output: &Path,
) -> Result<VideoReport, ServerError> {
    tokio::fs::create_dir_all(work_dir).await?;
    let input = work_dir.join("input.mp4");
    tokio::fs::write(&input, body).await?;
    Ok(pipeline.run(&input, work_dir, output).await?)
}

async fn get_threshold_handler(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({ "threshold": state.scheduler.threshold() }))
}

async fn set_threshold_handler(
    State(state): State<AppState>,
    Json(request): Json<ThresholdRequest>,
) -> Json<JsonValue> {
    state.scheduler.set_threshold(request.threshold);
    Json(json!({ "success": true, "threshold": request.threshold }))
}

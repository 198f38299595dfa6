use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::pipeline::{Pipeline, PipelineError, RunRequest};
use crate::store::Dataset;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub page: Option<u32>,
    #[serde(default)]
    pub exclude_merge: bool,
}

#[derive(Debug, Serialize)]
pub struct RegenerateResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegenerateResponse {
    fn ok(message: String) -> Self {
        RegenerateResponse {
            success: true,
            message,
            error: None,
        }
    }

    fn fail(message: String, error: Option<String>) -> Self {
        RegenerateResponse {
            success: false,
            message,
            error,
        }
    }
}

pub fn router(state: AppState) -> Router {
    // The review frontend is served from a different origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/tables", get(get_tables).post(save_tables))
        .route("/api/regenerate-table", post(regenerate_table))
        // Saved datasets can carry whole-document cell grids.
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /api/tables
async fn get_tables(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.load_dataset().await {
        Ok(Some(dataset)) => (StatusCode::OK, Json(json!(dataset))),
        Ok(None) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to read table data" })),
        ),
        Err(err) => {
            error!("failed to read table data: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to read table data" })),
            )
        }
    }
}

/// POST /api/tables
///
/// Direct external save from the review frontend. The body is the full
/// dataset; it replaces the file wholesale.
async fn save_tables(
    State(state): State<AppState>,
    Json(mut dataset): Json<Dataset>,
) -> impl IntoResponse {
    match state.pipeline.save_dataset(&mut dataset).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "table data saved" })),
        ),
        Err(err) => {
            error!("failed to save table data: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": "failed to save table data" })),
            )
        }
    }
}

/// POST /api/regenerate-table
async fn regenerate_table(
    State(state): State<AppState>,
    Json(request): Json<RegenerateRequest>,
) -> (StatusCode, Json<RegenerateResponse>) {
    let Some(page) = request.page else {
        return (
            StatusCode::BAD_REQUEST,
            Json(RegenerateResponse::fail(
                "no page number specified".to_string(),
                None,
            )),
        );
    };

    let run = RunRequest {
        page,
        exclude_merge: request.exclude_merge,
    };
    match state.pipeline.regenerate(run).await {
        Ok(report) => (
            StatusCode::OK,
            Json(RegenerateResponse::ok(report.message())),
        ),
        Err(err) => {
            error!("regeneration of page {page} failed: {err}");
            (
                status_for(&err),
                Json(RegenerateResponse::fail(err.to_string(), detail_for(&err))),
            )
        }
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::Config(_) => StatusCode::BAD_REQUEST,
        PipelineError::SnapshotLeftover { .. } => StatusCode::CONFLICT,
        PipelineError::Tool { .. }
        | PipelineError::Integrity { .. }
        | PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Captured stderr rides along in the response for diagnostics.
fn detail_for(err: &PipelineError) -> Option<String> {
    match err {
        PipelineError::Tool { stderr, .. } if !stderr.is_empty() => Some(stderr.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            status_for(&PipelineError::Config("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&PipelineError::SnapshotLeftover {
                path: PathBuf::from("x")
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&PipelineError::Tool {
                reason: "exit code 2".into(),
                stderr: String::new()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&PipelineError::Integrity {
                path: PathBuf::from("x"),
                detail: "gone".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn stderr_only_attached_when_present() {
        let with = PipelineError::Tool {
            reason: "exit code 2".into(),
            stderr: "trace".into(),
        };
        assert_eq!(detail_for(&with).as_deref(), Some("trace"));

        let without = PipelineError::Tool {
            reason: "exit code 2".into(),
            stderr: String::new(),
        };
        assert_eq!(detail_for(&without), None);
    }
}

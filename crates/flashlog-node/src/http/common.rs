//! HTTP request and response types shared by the ingest and store APIs

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json};
use flashlog::{NodeStats, SegmentError, StatsSnapshot, StorageError};
use flashlog_cluster::{ClusterView, MembershipView, Role};
use log::{error, trace};
use serde::{Deserialize, Serialize};

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            details: None,
        }
    }

    pub fn with_details(error: &str, message: &str, details: serde_json::Value) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            details: Some(details),
        }
    }

    pub fn invalid_parameter(param_name: &str, message: &str) -> Self {
        Self::with_details(
            "invalid_parameter",
            message,
            serde_json::json!({ "parameter": param_name }),
        )
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("internal_error", message)
    }

    pub fn peer_unavailable(message: &str) -> Self {
        Self::new("peer_unavailable", message)
    }

    /// Pair the response with its status code, ready to return from a handler.
    pub fn into_api_error(self) -> ApiError {
        (error_to_status_code(&self.error), Json(self))
    }
}

impl From<SegmentError> for ErrorResponse {
    fn from(err: SegmentError) -> Self {
        let message = err.to_string();
        match err {
            SegmentError::SegmentNotFound { segment_id } => Self::with_details(
                "segment_not_found",
                &message,
                serde_json::json!({ "segment_id": segment_id }),
            ),
            SegmentError::LeaseNotFound { lease_id } => Self::with_details(
                "lease_not_found",
                &message,
                serde_json::json!({ "lease_id": lease_id }),
            ),
            SegmentError::AlreadyClaimed { segment_id } => Self::with_details(
                "already_claimed",
                &message,
                serde_json::json!({ "segment_id": segment_id }),
            ),
            SegmentError::LeaseExpired {
                lease_id,
                segment_id,
            } => Self::with_details(
                "lease_expired",
                &message,
                serde_json::json!({ "lease_id": lease_id, "segment_id": segment_id }),
            ),
            SegmentError::InvalidTransition {
                segment_id,
                from,
                to,
            } => Self::with_details(
                "invalid_transition",
                &message,
                serde_json::json!({
                    "segment_id": segment_id,
                    "from": from.to_string(),
                    "to": to.to_string(),
                }),
            ),
            SegmentError::InvalidSegment { segment_id, reason } => Self::with_details(
                "invalid_segment",
                &message,
                serde_json::json!({ "segment_id": segment_id, "reason": reason }),
            ),
            SegmentError::Storage(storage_err) => {
                Self::internal_error(&format!("Storage error: {storage_err}"))
            }
        }
    }
}

impl From<StorageError> for ErrorResponse {
    fn from(err: StorageError) -> Self {
        Self::from(SegmentError::Storage(err))
    }
}

pub fn error_to_status_code(error_code: &str) -> StatusCode {
    match error_code {
        "invalid_parameter" | "validation_error" | "invalid_segment" => StatusCode::BAD_REQUEST,
        "segment_not_found" | "lease_not_found" => StatusCode::NOT_FOUND,
        "already_claimed" | "invalid_transition" => StatusCode::CONFLICT,
        "lease_expired" => StatusCode::GONE,
        "peer_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "internal_error" => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn api_error(err: impl Into<ErrorResponse>) -> ApiError {
    err.into().into_api_error()
}

/// Run segment file I/O on the blocking pool so it never stalls a runtime
/// worker.
pub async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        error!("Blocking task failed: {e}");
        ErrorResponse::internal_error(&format!("Blocking task failed: {e}")).into_api_error()
    })
}

// =============================================================================
// NODE-WIDE ENDPOINTS
// =============================================================================

/// What every node exposes on `/health`, `/stats` and `/cluster`.
pub trait NodeState: Send + Sync + 'static {
    fn role(&self) -> Role;
    fn stats(&self) -> &NodeStats;
    fn membership(&self) -> &dyn MembershipView;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub role: Role,
    pub timestamp: String,
}

pub async fn health_check<S: NodeState>(State(state): State<Arc<S>>) -> Json<HealthResponse> {
    trace!("GET /health");
    Json(HealthResponse {
        status: "healthy".to_string(),
        role: state.role(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn get_stats<S: NodeState>(State(state): State<Arc<S>>) -> Json<StatsSnapshot> {
    trace!("GET /stats");
    Json(state.stats().snapshot())
}

pub async fn get_cluster<S: NodeState>(State(state): State<Arc<S>>) -> Json<ClusterView> {
    trace!("GET /cluster");
    Json(state.membership().current_view().as_ref().clone())
}

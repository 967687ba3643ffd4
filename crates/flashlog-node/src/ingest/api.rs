//! Ingest HTTP API: the claim/commit protocol store consumers drive.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use flashlog::{IngestLog, Lease, LeaseId, NodeStats, SegmentId, SegmentInfo};
use flashlog_cluster::{MembershipView, Role};
use log::{debug, error, trace};
use tower_http::trace::TraceLayer;

use crate::http::{
    ApiResult, ErrorResponse, NodeState, api_error, blocking, get_cluster, get_stats, health_check,
};

pub type AppState = Arc<IngestNode>;

pub struct IngestNode {
    pub log: Arc<IngestLog>,
    pub stats: Arc<NodeStats>,
    pub membership: Arc<dyn MembershipView>,
}

impl NodeState for IngestNode {
    fn role(&self) -> Role {
        Role::Ingest
    }

    fn stats(&self) -> &NodeStats {
        &self.stats
    }

    fn membership(&self) -> &dyn MembershipView {
        self.membership.as_ref()
    }
}

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/ingest/segments", get(list_segments))
        .route("/ingest/next", post(claim_next))
        .route("/ingest/segments/{segment_id}/claim", post(claim_segment))
        .route("/ingest/leases/{lease_id}/body", get(read_lease))
        .route("/ingest/leases/{lease_id}/commit", post(commit_lease))
        .route("/ingest/leases/{lease_id}/release", post(release_lease))
        .route("/health", get(health_check::<IngestNode>))
        .route("/stats", get(get_stats::<IngestNode>))
        .route("/cluster", get(get_cluster::<IngestNode>))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

fn parse_param<T: FromStr>(name: &str, value: &str) -> ApiResult<T> {
    value.parse::<T>().map_err(|_| {
        ErrorResponse::invalid_parameter(name, &format!("'{value}' is not a valid {name}"))
            .into_api_error()
    })
}

#[tracing::instrument(level = "debug", skip(app_state))]
pub async fn list_segments(State(app_state): State<AppState>) -> ApiResult<Json<Vec<SegmentInfo>>> {
    trace!("GET /ingest/segments");
    let log = app_state.log.clone();
    blocking(move || log.list_flushed()).await?.map(Json).map_err(|e| {
        error!("GET /ingest/segments failed: {e}");
        api_error(e)
    })
}

#[tracing::instrument(level = "debug", skip(app_state))]
pub async fn claim_next(State(app_state): State<AppState>) -> ApiResult<Response> {
    let log = app_state.log.clone();
    match blocking(move || log.claim_next()).await? {
        Ok(Some(lease)) => {
            debug!("POST /ingest/next leased {} as {}", lease.segment_id, lease.lease_id);
            Ok(Json(lease).into_response())
        }
        Ok(None) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => {
            error!("POST /ingest/next failed: {e}");
            Err(api_error(e))
        }
    }
}

#[tracing::instrument(level = "debug", skip(app_state), fields(segment = %segment_id))]
pub async fn claim_segment(
    State(app_state): State<AppState>,
    Path(segment_id): Path<String>,
) -> ApiResult<Json<Lease>> {
    let id: SegmentId = parse_param("segment_id", &segment_id)?;
    let log = app_state.log.clone();
    blocking(move || log.claim(id)).await?.map(Json).map_err(|e| {
        debug!("POST /ingest/segments/{segment_id}/claim rejected: {e}");
        api_error(e)
    })
}

#[tracing::instrument(level = "debug", skip(app_state), fields(lease = %lease_id))]
pub async fn read_lease(
    State(app_state): State<AppState>,
    Path(lease_id): Path<String>,
) -> ApiResult<Response> {
    let id: LeaseId = parse_param("lease_id", &lease_id)?;
    let log = app_state.log.clone();
    let body = blocking(move || log.read(id)).await?.map_err(|e| {
        debug!("GET /ingest/leases/{lease_id}/body rejected: {e}");
        api_error(e)
    })?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response())
}

#[tracing::instrument(level = "debug", skip(app_state), fields(lease = %lease_id))]
pub async fn commit_lease(
    State(app_state): State<AppState>,
    Path(lease_id): Path<String>,
) -> ApiResult<Json<SegmentInfo>> {
    let id: LeaseId = parse_param("lease_id", &lease_id)?;
    let log = app_state.log.clone();
    match blocking(move || log.commit(id)).await? {
        Ok(info) => {
            app_state.stats.segment_committed(info.size);
            debug!("POST /ingest/leases/{lease_id}/commit committed {}", info.id);
            Ok(Json(info))
        }
        Err(e) => {
            debug!("POST /ingest/leases/{lease_id}/commit rejected: {e}");
            Err(api_error(e))
        }
    }
}

#[tracing::instrument(level = "debug", skip(app_state), fields(lease = %lease_id))]
pub async fn release_lease(
    State(app_state): State<AppState>,
    Path(lease_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id: LeaseId = parse_param("lease_id", &lease_id)?;
    let log = app_state.log.clone();
    match blocking(move || log.release(id)).await? {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            debug!("POST /ingest/leases/{lease_id}/release rejected: {e}");
            Err(api_error(e))
        }
    }
}

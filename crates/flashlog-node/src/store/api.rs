//! Store HTTP API: replication ingress, queries and trash management.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use flashlog::{
    NodeStats, QueryParams, ReplicaAck, StoreLog, StoreSegmentId, StoreSegmentInfo,
    TrashedSegment,
};
use flashlog_cluster::{MembershipView, Role};
use log::{debug, error, info, trace};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::http::{
    ApiResult, ErrorResponse, NodeState, api_error, blocking, get_cluster, get_stats, health_check,
};
use crate::store::query::{QueryResponse, encode_lines, scatter_gather};
use crate::transport::PeerTransport;

pub type AppState = Arc<StoreNode>;

pub struct StoreNode {
    pub store: Arc<StoreLog>,
    pub stats: Arc<NodeStats>,
    pub membership: Arc<dyn MembershipView>,
    pub transport: Arc<dyn PeerTransport>,
}

impl NodeState for StoreNode {
    fn role(&self) -> Role {
        Role::Store
    }

    fn stats(&self) -> &NodeStats {
        &self.stats
    }

    fn membership(&self) -> &dyn MembershipView {
        self.membership.as_ref()
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ReplicateParams {
    pub segment_id: String,
}

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/store/replicate",
            post(replicate).layer(DefaultBodyLimit::disable()),
        )
        .route("/store/query", get(query))
        .route("/store/local-query", get(local_query))
        .route("/store/segments", get(list_segments))
        .route("/store/trash", get(list_trash))
        .route("/store/trash/{segment_id}/restore", post(restore_segment))
        .route("/health", get(health_check::<StoreNode>))
        .route("/stats", get(get_stats::<StoreNode>))
        .route("/cluster", get(get_cluster::<StoreNode>))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

fn parse_segment_id(value: &str) -> ApiResult<StoreSegmentId> {
    value.parse::<StoreSegmentId>().map_err(|_| {
        ErrorResponse::invalid_parameter(
            "segment_id",
            &format!("'{value}' is not a valid store segment id"),
        )
        .into_api_error()
    })
}

#[tracing::instrument(level = "debug", skip(app_state, body), fields(segment = %params.segment_id, size = body.len()))]
pub async fn replicate(
    State(app_state): State<AppState>,
    Query(params): Query<ReplicateParams>,
    body: Bytes,
) -> ApiResult<Json<ReplicaAck>> {
    let id = parse_segment_id(&params.segment_id)?;
    let store = app_state.store.clone();
    match blocking(move || store.accept_replica(id, &body)).await? {
        Ok(ack) => {
            if ack.duplicate {
                debug!("POST /store/replicate {id} already held");
            } else {
                app_state.stats.replica_received(ack.size);
                trace!("POST /store/replicate stored {id} ({} bytes)", ack.size);
            }
            Ok(Json(ack))
        }
        Err(e) => {
            if e.is_client_error() {
                debug!("POST /store/replicate {id} rejected: {e}");
            } else {
                error!("POST /store/replicate {id} failed: {e}");
            }
            Err(api_error(e))
        }
    }
}

#[tracing::instrument(level = "debug", skip(app_state))]
pub async fn query(
    State(app_state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<QueryResponse> {
    let view = app_state.membership.current_view();
    let peers = app_state.membership.peers_by_role(Role::Store);
    scatter_gather(
        app_state.transport.as_ref(),
        Arc::clone(&app_state.store),
        &view.local_id,
        &peers,
        &params,
    )
    .await
    .map_err(|e| {
        error!("GET /store/query failed: {e}");
        ErrorResponse::internal_error(&e.to_string()).into_api_error()
    })
}

#[tracing::instrument(level = "debug", skip(app_state))]
pub async fn local_query(
    State(app_state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Response> {
    let store = app_state.store.clone();
    let records = blocking(move || store.query_local(&params))
        .await?
        .map_err(|e| {
            error!("GET /store/local-query failed: {e}");
            api_error(e)
        })?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        encode_lines(&records),
    )
        .into_response())
}

pub async fn list_segments(
    State(app_state): State<AppState>,
) -> ApiResult<Json<Vec<StoreSegmentInfo>>> {
    trace!("GET /store/segments");
    let store = app_state.store.clone();
    blocking(move || store.list_segments())
        .await?
        .map(Json)
        .map_err(api_error)
}

pub async fn list_trash(State(app_state): State<AppState>) -> ApiResult<Json<Vec<TrashedSegment>>> {
    trace!("GET /store/trash");
    let store = app_state.store.clone();
    blocking(move || store.list_trashed())
        .await?
        .map(Json)
        .map_err(api_error)
}

#[tracing::instrument(level = "info", skip(app_state), fields(segment = %segment_id))]
pub async fn restore_segment(
    State(app_state): State<AppState>,
    Path(segment_id): Path<String>,
) -> ApiResult<Json<StoreSegmentInfo>> {
    let id = parse_segment_id(&segment_id)?;
    let store = app_state.store.clone();
    match blocking(move || store.restore(id)).await? {
        Ok(info) => {
            info!("Restored segment {id} from trash");
            Ok(Json(info))
        }
        Err(e) => {
            debug!("POST /store/trash/{segment_id}/restore rejected: {e}");
            Err(api_error(e))
        }
    }
}

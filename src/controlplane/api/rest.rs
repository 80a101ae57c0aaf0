//! REST API Handlers
//!
//! Thin HTTP adapter over the [`Controller`]. Every create answers `202
//! Accepted` with the record in its `*ing` status; the background work keeps
//! running after the response is sent. Caller identity comes from gateway
//! headers.

use crate::controlplane::context::{Accepted, Context};
use crate::controlplane::controller::{Controller, CreateProfileRequest, UpdateProfileRequest};
use crate::controlplane::lifecycle::{
    CreateAttachmentRequest, CreateGroupRequest, CreateSnapshotRequest, CreateVolumeRequest,
    UpdateGroupRequest,
};
use crate::controlplane::replication::{CreateReplicationRequest, FailoverRequest};
use crate::domain::ports::{DriverRole, ListFilter, SortDir};
use crate::error::{Error, ErrorKind, Result};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

pub const HEADER_TENANT: &str = "x-tenant-id";
pub const HEADER_USER: &str = "x-user-id";
pub const HEADER_ADMIN: &str = "x-admin";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Tenant assumed when the gateway sends none
pub const DEFAULT_TENANT: &str = "default";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendVolumeRequest {
    pub new_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectMetricsRequest {
    pub instance_id: String,
    #[serde(default)]
    pub metric_names: Vec<String>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Control-plane error rendered as an HTTP response
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        if kind == ErrorKind::Internal {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected ({}): {}", kind, self.0);
        }
        let status =
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let details = self.0.is_retryable().then(|| "retry with different placement".to_string());
        (
            status,
            Json(ApiErrorResponse {
                error: kind.to_string(),
                message: self.0.to_string(),
                details,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    controller: Arc<Controller>,
    shutdown: CancellationToken,
}

impl RestRouter {
    /// Request contexts are cancelled when `shutdown` is
    pub fn new(controller: Arc<Controller>, shutdown: CancellationToken) -> Self {
        Self {
            controller,
            shutdown,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            controller: self.controller,
            shutdown: self.shutdown,
        };

        Router::new()
            // Volumes
            .route("/v1/volumes", get(list_volumes).post(create_volume))
            .route("/v1/volumes/:id", get(get_volume).delete(delete_volume))
            .route("/v1/volumes/:id/extend", post(extend_volume))
            // Attachments
            .route("/v1/attachments", get(list_attachments).post(create_attachment))
            .route(
                "/v1/attachments/:id",
                get(get_attachment).delete(delete_attachment),
            )
            // Snapshots
            .route("/v1/snapshots", get(list_snapshots).post(create_snapshot))
            .route("/v1/snapshots/:id", get(get_snapshot).delete(delete_snapshot))
            // Volume groups
            .route("/v1/groups", get(list_groups).post(create_group))
            .route(
                "/v1/groups/:id",
                get(get_group).put(update_group).delete(delete_group),
            )
            // Replication
            .route(
                "/v1/replications",
                get(list_replications).post(create_replication),
            )
            .route(
                "/v1/replications/:id",
                get(get_replication).delete(delete_replication),
            )
            .route("/v1/replications/:id/enable", post(enable_replication))
            .route("/v1/replications/:id/disable", post(disable_replication))
            .route("/v1/replications/:id/failover", post(failover_replication))
            // Profiles
            .route("/v1/profiles", get(list_profiles).post(create_profile))
            .route(
                "/v1/profiles/:id",
                get(get_profile).put(update_profile).delete(delete_profile),
            )
            // Inventory
            .route("/v1/pools", get(list_pools))
            .route("/v1/pools/:id", get(get_pool))
            .route("/v1/docks", get(list_docks))
            .route("/v1/docks/:id", get(get_dock))
            .route("/v1/backends/:name/metrics", post(collect_metrics))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(prometheus_metrics))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    controller: Arc<Controller>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Caller context from gateway headers
    fn caller(&self, headers: &HeaderMap) -> Context {
        let value = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let mut ctx = Context::new(
            value(HEADER_TENANT).unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            value(HEADER_USER).unwrap_or_default(),
        )
        .with_admin(value(HEADER_ADMIN).is_some_and(|v| v.eq_ignore_ascii_case("true")))
        .with_cancel(self.shutdown.child_token());
        if let Some(request_id) = value(HEADER_REQUEST_ID) {
            ctx = ctx.with_request_id(request_id);
        }
        ctx
    }
}

/// Paging, sorting and field filters from the query string
fn list_filter(params: BTreeMap<String, String>) -> Result<ListFilter> {
    let number = |key: &str, value: &str| {
        value
            .parse::<usize>()
            .map_err(|_| Error::Validation(format!("{} '{}' is not a number", key, value)))
    };
    let mut filter = ListFilter::new();
    for (key, value) in params {
        match key.as_str() {
            "offset" => filter.offset = number(&key, &value)?,
            "limit" => filter.limit = Some(number(&key, &value)?),
            "sortKey" => filter.sort_key = Some(value),
            "sortDir" => {
                filter.sort_dir = match value.to_lowercase().as_str() {
                    "asc" => SortDir::Asc,
                    "desc" => SortDir::Desc,
                    _ => {
                        return Err(Error::Validation(format!(
                            "sortDir '{}' must be asc or desc",
                            value
                        )))
                    }
                }
            }
            _ => filter = filter.field(&key, value),
        }
    }
    Ok(filter)
}

fn accepted<T: Serialize>(accepted: Accepted<T>) -> Response {
    (StatusCode::ACCEPTED, Json(accepted.detach())).into_response()
}

/// Deletes of records already gone answer `204 No Content`
fn deleted<T: Serialize>(accepted: Accepted<Option<T>>) -> Response {
    match accepted.detach() {
        Some(record) => (StatusCode::ACCEPTED, Json(record)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn found<T: Serialize>(record: T) -> Response {
    (StatusCode::OK, Json(record)).into_response()
}

// =============================================================================
// Volume Handlers
// =============================================================================

async fn create_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateVolumeRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(accepted(state.controller.create_volume(&ctx, request).await?))
}

async fn list_volumes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.list_volumes(&ctx, list_filter(params)?).await?))
}

async fn get_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.get_volume(&ctx, &id).await?))
}

async fn extend_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ExtendVolumeRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(accepted(
        state.controller.extend_volume(&ctx, &id, request.new_size).await?,
    ))
}

async fn delete_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(deleted(state.controller.delete_volume(&ctx, &id).await?))
}

// =============================================================================
// Attachment Handlers
// =============================================================================

async fn create_attachment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateAttachmentRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(accepted(state.controller.create_attachment(&ctx, request).await?))
}

async fn list_attachments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(
        state.controller.list_attachments(&ctx, list_filter(params)?).await?,
    ))
}

async fn get_attachment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.get_attachment(&ctx, &id).await?))
}

async fn delete_attachment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(deleted(state.controller.delete_attachment(&ctx, &id).await?))
}

// =============================================================================
// Snapshot Handlers
// =============================================================================

async fn create_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateSnapshotRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(accepted(state.controller.create_snapshot(&ctx, request).await?))
}

async fn list_snapshots(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(
        state.controller.list_snapshots(&ctx, list_filter(params)?).await?,
    ))
}

async fn get_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.get_snapshot(&ctx, &id).await?))
}

async fn delete_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(deleted(state.controller.delete_snapshot(&ctx, &id).await?))
}

// =============================================================================
// Group Handlers
// =============================================================================

async fn create_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateGroupRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(accepted(state.controller.create_group(&ctx, request).await?))
}

async fn list_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.list_groups(&ctx, list_filter(params)?).await?))
}

async fn get_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.get_group(&ctx, &id).await?))
}

async fn update_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateGroupRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(accepted(state.controller.update_group(&ctx, &id, request).await?))
}

async fn delete_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(deleted(state.controller.delete_group(&ctx, &id).await?))
}

// =============================================================================
// Replication Handlers
// =============================================================================

async fn create_replication(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateReplicationRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(accepted(state.controller.create_replication(&ctx, request).await?))
}

async fn list_replications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(
        state.controller.list_replications(&ctx, list_filter(params)?).await?,
    ))
}

async fn get_replication(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.get_replication(&ctx, &id).await?))
}

async fn delete_replication(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(deleted(state.controller.delete_replication(&ctx, &id).await?))
}

async fn enable_replication(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(accepted(state.controller.enable_replication(&ctx, &id).await?))
}

async fn disable_replication(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(accepted(state.controller.disable_replication(&ctx, &id).await?))
}

async fn failover_replication(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<FailoverRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(accepted(
        state.controller.failover_replication(&ctx, &id, request).await?,
    ))
}

// =============================================================================
// Profile Handlers
// =============================================================================

async fn create_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateProfileRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    let profile = state.controller.create_profile(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(profile)).into_response())
}

async fn list_profiles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(
        state.controller.list_profiles(&ctx, list_filter(params)?).await?,
    ))
}

async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.get_profile(&ctx, &id).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateProfileRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.update_profile(&ctx, &id, request).await?))
}

async fn delete_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    state.controller.delete_profile(&ctx, &id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// =============================================================================
// Inventory Handlers
// =============================================================================

async fn list_pools(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.list_pools(&ctx, list_filter(params)?).await?))
}

async fn get_pool(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.get_pool(&ctx, &id).await?))
}

async fn list_docks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.list_docks(&ctx, list_filter(params)?).await?))
}

async fn get_dock(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    Ok(found(state.controller.get_dock(&ctx, &id).await?))
}

async fn collect_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(backend): Path<String>,
    Json(request): Json<CollectMetricsRequest>,
) -> ApiResult<Response> {
    let ctx = state.caller(&headers);
    let samples = state
        .controller
        .collect_metrics(&ctx, &backend, &request.instance_id, request.metric_names)
        .await?;
    Ok(found(samples))
}

// =============================================================================
// Health Handlers
// =============================================================================

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready once any backend can provision
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let handles = state.controller.manager().handles();
    state
        .controller
        .metrics()
        .set_ready_backends(handles.iter().filter(|h| h.is_ready()).count());
    if handles.iter().any(|h| h.role_ready(DriverRole::Provision)) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no backend ready")
    }
}

/// Prometheus text exposition
async fn prometheus_metrics(State(state): State<AppState>) -> ApiResult<Response> {
    let body = state.controller.metrics().gather()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::testing::{Harness, TENANT};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(h: &Harness) -> Router {
        RestRouter::new(h.controller.clone(), CancellationToken::new()).build()
    }

    async fn call(
        h: &Harness,
        method: &str,
        uri: &str,
        tenant: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(HEADER_TENANT, tenant)
            .header(HEADER_USER, "user-a")
            .header(header::CONTENT_TYPE, "application/json");
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let response = router(h).oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[test]
    fn test_list_filter_from_query() {
        let mut params = BTreeMap::new();
        params.insert("offset".to_string(), "2".to_string());
        params.insert("limit".to_string(), "5".to_string());
        params.insert("sortDir".to_string(), "DESC".to_string());
        params.insert("status".to_string(), "available".to_string());
        let filter = list_filter(params).unwrap();
        assert_eq!(filter.offset, 2);
        assert_eq!(filter.limit, Some(5));
        assert_eq!(filter.sort_dir, SortDir::Desc);
        assert_eq!(filter.fields.get("status").map(String::as_str), Some("available"));

        let mut params = BTreeMap::new();
        params.insert("limit".to_string(), "lots".to_string());
        assert!(list_filter(params).is_err());
    }

    #[tokio::test]
    async fn test_create_volume_is_accepted() {
        let h = Harness::new().await;
        let (status, body) = call(
            &h,
            "POST",
            "/v1/volumes",
            TENANT,
            Some(json!({"id": "v1", "name": "v1", "size": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "creating");
        assert_eq!(body["tenantId"], TENANT);

        let (status, _) = call(&h, "GET", "/v1/volumes/v1", TENANT, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&h, "GET", "/v1/volumes/v1", "tenant-b", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let h = Harness::new().await;
        let (status, body) = call(&h, "GET", "/v1/volumes/missing", TENANT, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = call(
            &h,
            "POST",
            "/v1/volumes",
            TENANT,
            Some(json!({"name": "v0", "size": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &h,
            "POST",
            "/v1/volumes",
            TENANT,
            Some(json!({"name": "huge", "size": 1000})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["details"].is_string());

        let (status, _) = call(&h, "DELETE", "/v1/volumes/missing", TENANT, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let h = Harness::new().await;
        let (status, _) = call(&h, "GET", "/health", TENANT, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&h, "GET", "/ready", TENANT, None).await;
        assert_eq!(status, StatusCode::OK);

        let response = router(&h)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_not_ready_until_setup() {
        let h = Harness::unstarted().await;
        let (status, _) = call(&h, "GET", "/ready", TENANT, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = call(
            &h,
            "POST",
            "/v1/volumes",
            TENANT,
            Some(json!({"name": "v1", "size": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "initialization_pending");
    }
}

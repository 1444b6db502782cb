use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;
use wrench_api::{ApiError, ApiResponse};
use wrench_core::{BrokerStats, Event, EventType, HistoryQuery};
use wrench_notifications::{InAppMessage, NotificationRecord, RecordQuery};
use wrench_storage::{
    EquipmentStatus, NewResource, NewUser, NewWorkOrder, Resource, ResourceId, User, UserId,
    WorkOrder, WorkOrderFilter, WorkOrderId,
};

use crate::observers::MetricsSnapshot;
use crate::server::AppState;

type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

/// Parse a JSON body that may be omitted entirely.
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    commit: &'static str,
}

pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            commit: env!("GIT_COMMIT"),
        }),
    )
}

/// Prometheus text exposition.
pub async fn prometheus_metrics() -> Result<impl IntoResponse, ApiError> {
    let body = crate::metrics::render_metrics()
        .ok_or_else(|| ApiError::not_found("Prometheus metrics are disabled"))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

// ---- Users ----

pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<NewUser>,
) -> ApiResult<User> {
    let user = state.directory.register_user(request).await?;
    Ok(ApiResponse::created(user))
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    Ok(ApiResponse::ok(state.directory.list_users().await?))
}

pub async fn get_user(State(state): State<AppState>, Path(id): Path<UserId>) -> ApiResult<User> {
    Ok(ApiResponse::ok(state.directory.get_user(id).await?))
}

pub async fn user_inbox(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> ApiResult<Vec<InAppMessage>> {
    state.directory.get_user(id).await?;
    let messages = state
        .inbox
        .list(id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(ApiResponse::ok(messages))
}

// ---- Resources ----

pub async fn create_resource(
    State(state): State<AppState>,
    Json(request): Json<NewResource>,
) -> ApiResult<Resource> {
    let resource = state.directory.create_resource(request).await?;
    Ok(ApiResponse::created(resource))
}

pub async fn list_resources(State(state): State<AppState>) -> ApiResult<Vec<Resource>> {
    Ok(ApiResponse::ok(state.directory.list_resources().await?))
}

pub async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> ApiResult<Resource> {
    Ok(ApiResponse::ok(state.directory.get_resource(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ConditionReport {
    pub status: EquipmentStatus,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn report_condition(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
    Json(report): Json<ConditionReport>,
) -> ApiResult<Resource> {
    let resource = state
        .directory
        .report_condition(id, report.status, report.note)
        .await?;
    Ok(ApiResponse::ok(resource))
}

// ---- Work orders ----

pub async fn create_work_order(
    State(state): State<AppState>,
    Json(request): Json<NewWorkOrder>,
) -> ApiResult<WorkOrder> {
    let order = state.work_orders.create(request).await?;
    Ok(ApiResponse::created(order))
}

pub async fn list_work_orders(
    State(state): State<AppState>,
    Query(filter): Query<WorkOrderFilter>,
) -> ApiResult<Vec<WorkOrder>> {
    Ok(ApiResponse::ok(state.work_orders.list(&filter).await?))
}

pub async fn get_work_order(
    State(state): State<AppState>,
    Path(id): Path<WorkOrderId>,
) -> ApiResult<WorkOrder> {
    Ok(ApiResponse::ok(state.work_orders.get(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub technician_id: UserId,
}

pub async fn assign_work_order(
    State(state): State<AppState>,
    Path(id): Path<WorkOrderId>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<WorkOrder> {
    let order = state.work_orders.assign(id, request.technician_id).await?;
    Ok(ApiResponse::ok(order))
}

pub async fn start_work_order(
    State(state): State<AppState>,
    Path(id): Path<WorkOrderId>,
) -> ApiResult<WorkOrder> {
    Ok(ApiResponse::ok(state.work_orders.start(id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    #[serde(default)]
    pub resolution: Option<String>,
}

pub async fn complete_work_order(
    State(state): State<AppState>,
    Path(id): Path<WorkOrderId>,
    body: Bytes,
) -> ApiResult<WorkOrder> {
    let request: CompleteRequest = optional_json(&body)?;
    let order = state.work_orders.complete(id, request.resolution).await?;
    Ok(ApiResponse::ok(order))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_work_order(
    State(state): State<AppState>,
    Path(id): Path<WorkOrderId>,
    body: Bytes,
) -> ApiResult<WorkOrder> {
    let request: CancelRequest = optional_json(&body)?;
    let order = state.work_orders.cancel(id, request.reason).await?;
    Ok(ApiResponse::ok(order))
}

// ---- Broker introspection ----

#[derive(Debug, Default, Deserialize)]
pub struct EventsParams {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// RFC 3339 timestamp; only events at or after it.
    pub since: Option<String>,
    pub source: Option<String>,
    pub limit: Option<usize>,
}

impl EventsParams {
    fn into_query(self) -> Result<HistoryQuery, ApiError> {
        let mut query = HistoryQuery::new();
        if let Some(tag) = self.event_type {
            query = query.event_type(
                EventType::parse(&tag).map_err(|e| ApiError::bad_request(e.to_string()))?,
            );
        }
        if let Some(since) = self.since {
            let since = OffsetDateTime::parse(&since, &Rfc3339)
                .map_err(|e| ApiError::bad_request(format!("invalid 'since' timestamp: {e}")))?;
            query = query.since(since);
        }
        if let Some(source) = self.source {
            query = query.source(source);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        Ok(query)
    }
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> ApiResult<Vec<Event>> {
    let query = params.into_query()?;
    let events = state
        .broker
        .history(&query)
        .await
        .iter()
        .map(|event| Event::clone(event))
        .collect();
    Ok(ApiResponse::ok(events))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStatus {
    #[serde(flatten)]
    pub stats: BrokerStats,
    pub subscribed_types: Vec<EventType>,
    /// Registrations that receive every event type.
    pub catch_all: usize,
}

pub async fn broker_status(State(state): State<AppState>) -> ApiResult<BrokerStatus> {
    Ok(ApiResponse::ok(BrokerStatus {
        stats: state.broker.stats().await,
        subscribed_types: state.broker.subscribed_types().await,
        catch_all: state.broker.catch_all_count().await,
    }))
}

pub async fn work_order_metrics(State(state): State<AppState>) -> ApiResult<MetricsSnapshot> {
    Ok(ApiResponse::ok(state.observers.metrics.snapshot().await))
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationsParams {
    pub recipient: Option<UserId>,
    pub event: Option<Uuid>,
    #[serde(default)]
    pub failed: bool,
    pub limit: Option<usize>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<NotificationsParams>,
) -> ApiResult<Vec<NotificationRecord>> {
    let query = RecordQuery {
        recipient_id: params.recipient,
        event_id: params.event,
        failed_only: params.failed,
        limit: params.limit,
    };
    Ok(ApiResponse::ok(state.notifications.query(&query).await))
}

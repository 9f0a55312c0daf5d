use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::tracking::acting_rider;
use crate::engine::queue::{enqueue_dispatch, DispatchJob};
use crate::engine::reconciler::ReconcileReport;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::order::{Order, OrderStatus};
use crate::models::principal::{Principal, Role};
use crate::models::tracking::TrackedOrder;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/dispatch", post(dispatch_order))
        .route("/orders/:order_id/dispatch/queue", post(queue_dispatch))
        .route("/orders/:order_id/assign-rider", put(assign_rider))
        .route("/orders/:order_id/status", put(update_status))
        .route("/reconcile", post(reconcile))
}

#[derive(Deserialize, Default)]
pub struct DispatchRequest {
    pub radius_m: Option<f64>,
}

#[derive(Deserialize)]
pub struct AssignRiderRequest {
    pub rider_id: Uuid,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Serialize)]
pub struct QueuedResponse {
    pub order_id: Uuid,
    pub queued: bool,
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Path(order_id): Path<Uuid>,
) -> Result<Json<TrackedOrder>, AppError> {
    let order = state.orchestrator.get_tracked_order(order_id).await?;
    Ok(Json(order))
}

async fn dispatch_order(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<DispatchRequest>>,
) -> Result<Json<Assignment>, AppError> {
    principal.require(Role::Admin)?;
    let request = payload.map(|Json(request)| request).unwrap_or_default();

    if let Some(radius_m) = request.radius_m {
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(AppError::Validation("radius_m must be > 0".to_string()));
        }
    }

    let assignment = state
        .orchestrator
        .assign_nearest_rider(order_id, request.radius_m)
        .await?;
    Ok(Json(assignment))
}

async fn queue_dispatch(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(order_id): Path<Uuid>,
) -> Result<(StatusCode, Json<QueuedResponse>), AppError> {
    principal.require(Role::Admin)?;
    let order = state.orchestrator.require_order(order_id).await?;
    if order.status != OrderStatus::Pending {
        return Err(AppError::InvalidTransition {
            from: order.status,
            to: OrderStatus::Assigned,
        });
    }

    enqueue_dispatch(&state, DispatchJob::new(order_id)).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            order_id,
            queued: true,
        }),
    ))
}

async fn assign_rider(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<AssignRiderRequest>,
) -> Result<Json<Assignment>, AppError> {
    principal.require(Role::Admin)?;
    let assignment = state
        .orchestrator
        .assign_rider(order_id, payload.rider_id)
        .await?;
    Ok(Json(assignment))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let rider = acting_rider(&state, &principal).await?;
    let order = state
        .orchestrator
        .transition_order(order_id, payload.status, rider)
        .await?;
    Ok(Json(order))
}

async fn reconcile(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<ReconcileReport>, AppError> {
    principal.require(Role::Admin)?;
    let report = state.orchestrator.reconcile().await?;
    Ok(Json(report))
}

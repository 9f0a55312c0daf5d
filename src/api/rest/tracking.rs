use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::location::{GeoPoint, LocationUpdate, RiderLocation};
use crate::models::principal::{Principal, Role};
use crate::models::order::Order;
use crate::models::rider::RiderPresence;
use crate::models::tracking::{HistoryNote, OrderTracking, TrackingHistoryEntry, TrackingPatch};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracking/riders/location", put(update_rider_location))
        .route("/tracking/riders/online", get(online_riders))
        .route("/tracking/riders/nearby", get(nearby_riders))
        .route("/tracking/riders/:rider_id/location", get(get_rider_location))
        .route("/tracking/riders/:rider_id/orders", get(rider_active_orders))
        .route(
            "/tracking/orders/:order_id",
            put(update_order_tracking).get(get_order_tracking),
        )
        .route(
            "/tracking/orders/:order_id/history",
            get(order_history).post(add_history_entry),
        )
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub max_distance: Option<f64>,
}

/// Rider id of the caller when it is a rider, `None` for admins.
pub(crate) async fn acting_rider(
    state: &AppState,
    principal: &Principal,
) -> Result<Option<Uuid>, AppError> {
    match principal.role {
        Role::Admin => Ok(None),
        Role::Rider => Ok(Some(
            state.orchestrator.rider_for_user(principal.id).await?.id,
        )),
    }
}

async fn update_rider_location(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<LocationUpdate>,
) -> Result<Json<RiderLocation>, AppError> {
    principal.require(Role::Rider)?;
    let rider = state.orchestrator.rider_for_user(principal.id).await?;

    let location = state
        .orchestrator
        .update_rider_location(rider.id, payload)
        .await?;
    Ok(Json(location))
}

async fn get_rider_location(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Path(rider_id): Path<Uuid>,
) -> Result<Json<RiderLocation>, AppError> {
    let location = state.orchestrator.get_rider_location(rider_id).await?;
    Ok(Json(location))
}

async fn online_riders(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
) -> Result<Json<Vec<RiderPresence>>, AppError> {
    let riders = state.orchestrator.list_online_riders().await?;
    Ok(Json(riders))
}

async fn nearby_riders(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<RiderPresence>>, AppError> {
    let riders = state
        .orchestrator
        .find_nearby_riders(GeoPoint::new(query.lat, query.lng), query.max_distance)
        .await?;
    Ok(Json(riders))
}

async fn update_order_tracking(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<TrackingPatch>,
) -> Result<Json<OrderTracking>, AppError> {
    principal.require(Role::Rider)?;
    let rider = acting_rider(&state, &principal).await?;

    let tracking = state
        .orchestrator
        .update_order_tracking(order_id, rider, payload)
        .await?;
    Ok(Json(tracking))
}

async fn get_order_tracking(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderTracking>, AppError> {
    let tracking = state.orchestrator.get_order_tracking(order_id).await?;
    Ok(Json(tracking))
}

async fn order_history(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<TrackingHistoryEntry>>, AppError> {
    let history = state.orchestrator.get_order_history(order_id).await?;
    Ok(Json(history))
}

async fn add_history_entry(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<HistoryNote>,
) -> Result<(StatusCode, Json<TrackingHistoryEntry>), AppError> {
    let rider = acting_rider(&state, &principal).await?;

    let entry = state
        .orchestrator
        .add_history_entry(order_id, rider, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn rider_active_orders(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(rider_id): Path<Uuid>,
) -> Result<Json<Vec<Order>>, AppError> {
    if let Some(caller) = acting_rider(&state, &principal).await? {
        if caller != rider_id {
            return Err(AppError::Forbidden(
                "riders may only list their own orders".to_string(),
            ));
        }
    }

    let orders = state.orchestrator.list_rider_active_orders(rider_id).await?;
    Ok(Json(orders))
}

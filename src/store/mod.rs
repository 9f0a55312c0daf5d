//! Storage seams.
//!
//! The ledger (orders) and registry (riders) model the relational side; the
//! location store models the geospatial document side. Each call is atomic
//! for the single row or document it touches. Nothing spans stores, so
//! compound writes are sequenced by the orchestrator and repaired by
//! reconciliation.

pub mod ledger;
pub mod location;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::location::{GeoPoint, LocationUpdate, NearbyLocation, RiderLocation};
use crate::models::order::{Order, OrderFilter, OrderStatus};
use crate::models::rider::Rider;
use crate::models::tracking::{OrderTracking, TrackingHistoryEntry, TrackingPatch};

pub use ledger::InMemoryLedger;
pub use location::InMemoryLocationStore;

/// Ledger row before and after a status change.
#[derive(Debug, Clone)]
pub struct Transitioned {
    pub previous: Order,
    pub current: Order,
}

#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn insert_order(&self, order: Order) -> Result<Order, AppError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError>;

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, AppError>;

    /// Validate `next` against the state machine and apply it in one step.
    /// `rider_id` is required when moving to `assigned`.
    async fn transition(
        &self,
        order_id: Uuid,
        next: OrderStatus,
        rider_id: Option<Uuid>,
    ) -> Result<Transitioned, AppError>;
}

#[async_trait]
pub trait RiderRegistry: Send + Sync {
    async fn insert_rider(&self, rider: Rider) -> Result<Rider, AppError>;

    async fn get_rider(&self, rider_id: Uuid) -> Result<Option<Rider>, AppError>;

    async fn rider_by_user(&self, user_id: Uuid) -> Result<Option<Rider>, AppError>;

    async fn list_riders(&self) -> Result<Vec<Rider>, AppError>;

    /// Compare-and-set `is_available` true -> false and stamp
    /// `last_assigned`. Returns the row as it was before the claim; fails
    /// with `RiderUnavailable` when already taken.
    async fn claim(&self, rider_id: Uuid) -> Result<Rider, AppError>;

    /// Undo a claim whose ledger write failed: back to available with the
    /// prior `last_assigned`. `Ok(false)` when the rider is already available.
    async fn revert_claim(
        &self,
        rider_id: Uuid,
        last_assigned: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError>;

    /// Compare-and-set on `is_available`. `Ok(false)` when the row did not
    /// hold `expected`.
    async fn set_availability(
        &self,
        rider_id: Uuid,
        expected: bool,
        available: bool,
    ) -> Result<bool, AppError>;
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Upsert keyed by rider; last arrival wins.
    async fn upsert_location(
        &self,
        rider_id: Uuid,
        update: LocationUpdate,
    ) -> Result<RiderLocation, AppError>;

    async fn get_location(&self, rider_id: Uuid) -> Result<Option<RiderLocation>, AppError>;

    async fn list_locations(&self) -> Result<Vec<RiderLocation>, AppError>;

    /// Online riders within `radius_m` of `center`, nearest first.
    async fn find_nearby(
        &self,
        center: &GeoPoint,
        radius_m: f64,
    ) -> Result<Vec<NearbyLocation>, AppError>;

    /// Returns `false` when the rider has no location row yet.
    async fn set_current_order(
        &self,
        rider_id: Uuid,
        order_id: Option<Uuid>,
    ) -> Result<bool, AppError>;

    /// Clear `current_order_id` only while it still refers to `order_id`.
    async fn clear_current_order(&self, rider_id: Uuid, order_id: Uuid)
        -> Result<bool, AppError>;

    /// Partial upsert keyed by order; creates the snapshot when missing.
    async fn upsert_tracking(
        &self,
        order_id: Uuid,
        patch: TrackingPatch,
    ) -> Result<OrderTracking, AppError>;

    async fn get_tracking(&self, order_id: Uuid) -> Result<Option<OrderTracking>, AppError>;

    async fn list_tracking(&self) -> Result<Vec<OrderTracking>, AppError>;

    /// Status write that bypasses the no-regress rule, applied only while
    /// the snapshot still holds `expected`. `None` when the snapshot is
    /// missing or has moved on. Only repair paths call this.
    async fn force_tracking_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
    ) -> Result<Option<OrderTracking>, AppError>;

    async fn append_history(&self, entry: TrackingHistoryEntry) -> Result<(), AppError>;

    /// History of one order, newest first.
    async fn list_history(&self, order_id: Uuid) -> Result<Vec<TrackingHistoryEntry>, AppError>;
}

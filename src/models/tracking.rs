use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::error::AppError;
use crate::models::location::{GeoPoint, RiderLocation};
use crate::models::order::{Order, OrderStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTracking {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub location: Option<GeoPoint>,
    pub rider_id: Option<Uuid>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial tracking write. `None` keeps the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingPatch {
    #[serde(skip_deserializing)]
    pub rider_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub location: Option<GeoPoint>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl TrackingPatch {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }
}

impl OrderTracking {
    pub fn new(order_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            order_id,
            status: OrderStatus::Pending,
            location: None,
            rider_id: None,
            estimated_arrival: None,
            actual_arrival: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a partial write. A status that would move the snapshot backwards
    /// is dropped; the other fields still apply.
    pub fn merge(&mut self, patch: TrackingPatch, now: DateTime<Utc>) {
        if let Some(rider_id) = patch.rider_id {
            self.rider_id = Some(rider_id);
        }
        if let Some(status) = patch.status {
            if lifecycle::may_mirror(self.status, status) {
                self.status = status;
            }
        }
        if let Some(location) = patch.location {
            self.location = Some(location);
        }
        if let Some(eta) = patch.estimated_arrival {
            self.estimated_arrival = Some(eta);
        }
        if let Some(arrival) = patch.actual_arrival {
            self.actual_arrival = Some(arrival);
        }
        if let Some(notes) = patch.notes {
            self.notes = Some(notes);
        }
        self.updated_at = now;
    }
}

/// Append-only audit record of one tracking event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingHistoryEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub location: Option<GeoPoint>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TrackingHistoryEntry {
    pub fn new(
        order_id: Uuid,
        status: OrderStatus,
        location: Option<GeoPoint>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            status,
            location,
            notes,
            created_at: now,
        }
    }
}

/// Manually added history entry. The status is taken from the ledger.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryNote {
    pub location: Option<GeoPoint>,
    pub notes: Option<String>,
}

impl HistoryNote {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(location) = &self.location {
            location.validate()?;
        }
        if self.location.is_none() && self.notes.as_deref().is_none_or(|n| n.trim().is_empty()) {
            return Err(AppError::Validation(
                "history entry needs a location or notes".to_string(),
            ));
        }
        Ok(())
    }
}

/// Merged read: ledger owns status and billing, the location store owns
/// live position and eta.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedOrder {
    pub order: Order,
    pub tracking: Option<OrderTracking>,
    pub rider_location: Option<RiderLocation>,
}

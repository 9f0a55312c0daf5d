use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Assigned,
    PickedUp,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Assigned => "assigned",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Non-terminal states past `pending`: the rider is bound to the order.
    pub fn holds_rider(&self) -> bool {
        matches!(self, OrderStatus::Assigned | OrderStatus::PickedUp)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_name: String,
    pub customer_phone: String,
    pub pickup_address: String,
    pub pickup: GeoPoint,
    pub dropoff_address: String,
    pub dropoff: GeoPoint,
    pub distance_km: f64,
    pub price_cents: u64,
    pub status: OrderStatus,
    pub assigned_rider_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the external order CRUD when an order is created.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub customer_name: String,
    pub customer_phone: String,
    pub pickup_address: String,
    pub pickup: GeoPoint,
    pub dropoff_address: String,
    pub dropoff: GeoPoint,
    pub distance_km: f64,
    pub price_cents: u64,
    pub created_by: Uuid,
}

impl Order {
    pub fn create(new: NewOrder) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            customer_name: new.customer_name,
            customer_phone: new.customer_phone,
            pickup_address: new.pickup_address,
            pickup: new.pickup,
            dropoff_address: new.dropoff_address,
            dropoff: new.dropoff,
            distance_km: new.distance_km,
            price_cents: new.price_cents,
            status: OrderStatus::Pending,
            assigned_rider_id: None,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filter for ledger scans. Empty filter matches every order.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub rider_id: Option<Uuid>,
    pub non_terminal: bool,
}

impl OrderFilter {
    pub fn non_terminal() -> Self {
        Self {
            non_terminal: true,
            ..Self::default()
        }
    }

    /// Orders a rider is currently holding.
    pub fn active_for_rider(rider_id: Uuid) -> Self {
        Self {
            rider_id: Some(rider_id),
            non_terminal: true,
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        if self.non_terminal && order.status.is_terminal() {
            return false;
        }
        if let Some(rider_id) = self.rider_id {
            if order.assigned_rider_id != Some(rider_id) {
                return false;
            }
        }
        true
    }
}

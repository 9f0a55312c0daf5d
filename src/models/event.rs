use serde::Serialize;
use uuid::Uuid;

use crate::models::assignment::Assignment;
use crate::models::location::GeoPoint;
use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    OrderAssigned(Assignment),
    OrderStatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    TrackingUpdated {
        order_id: Uuid,
        status: OrderStatus,
        location: Option<GeoPoint>,
    },
    RiderMoved {
        rider_id: Uuid,
        location: GeoPoint,
        is_online: bool,
    },
}

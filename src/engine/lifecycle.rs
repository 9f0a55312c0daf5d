//! Order state machine.
//!
//! ```text
//! pending -> assigned -> picked_up -> delivered
//!    \           \           \
//!     +-----------+-----------+----> cancelled
//! ```
//!
//! Anything not listed in [`TRANSITIONS`] is rejected with
//! [`AppError::InvalidTransition`] before any write happens.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};

pub const TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    (OrderStatus::Pending, OrderStatus::Assigned),
    (OrderStatus::Assigned, OrderStatus::PickedUp),
    (OrderStatus::PickedUp, OrderStatus::Delivered),
    (OrderStatus::Pending, OrderStatus::Cancelled),
    (OrderStatus::Assigned, OrderStatus::Cancelled),
    (OrderStatus::PickedUp, OrderStatus::Cancelled),
];

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

pub fn check(from: OrderStatus, to: OrderStatus) -> Result<(), AppError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition { from, to })
    }
}

/// Apply a legal transition to a ledger row, keeping `assigned_rider_id`
/// set exactly while the order holds a rider.
pub fn apply(
    order: &mut Order,
    next: OrderStatus,
    rider_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    check(order.status, next)?;

    if next == OrderStatus::Assigned {
        let rider_id = rider_id.ok_or_else(|| {
            AppError::Validation("assigning an order requires a rider".to_string())
        })?;
        order.assigned_rider_id = Some(rider_id);
    } else if next.is_terminal() {
        order.assigned_rider_id = None;
    }

    order.status = next;
    order.updated_at = now;
    Ok(())
}

fn progress(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::Assigned => 1,
        OrderStatus::PickedUp => 2,
        OrderStatus::Delivered => 3,
        OrderStatus::Cancelled => 3,
    }
}

/// Whether a tracking snapshot at `current` may take `next`. Snapshots move
/// forward only; `cancelled` is reachable from any non-terminal state.
pub fn may_mirror(current: OrderStatus, next: OrderStatus) -> bool {
    if current == next {
        return true;
    }
    if current.is_terminal() {
        return false;
    }
    next == OrderStatus::Cancelled || progress(next) > progress(current)
}

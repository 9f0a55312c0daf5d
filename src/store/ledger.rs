use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::error::AppError;
use crate::models::order::{Order, OrderFilter, OrderStatus};
use crate::models::rider::Rider;
use crate::store::{OrderLedger, RiderRegistry, Transitioned};

/// Relational side: orders and riders. Row updates run under the map's
/// per-entry lock, which stands in for a row-level conditional UPDATE.
pub struct InMemoryLedger {
    orders: DashMap<Uuid, Order>,
    riders: DashMap<Uuid, Rider>,
    reachable: AtomicBool,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            riders: DashMap::new(),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<(), AppError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::StoreUnavailable("ledger unreachable".to_string()))
        }
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn rider_count(&self) -> usize {
        self.riders.len()
    }
}

#[async_trait]
impl OrderLedger for InMemoryLedger {
    async fn insert_order(&self, order: Order) -> Result<Order, AppError> {
        self.ensure_reachable()?;
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        self.ensure_reachable()?;
        Ok(self.orders.get(&order_id).map(|entry| entry.value().clone()))
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, AppError> {
        self.ensure_reachable()?;
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn transition(
        &self,
        order_id: Uuid,
        next: OrderStatus,
        rider_id: Option<Uuid>,
    ) -> Result<Transitioned, AppError> {
        self.ensure_reachable()?;
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        let previous = order.clone();
        lifecycle::apply(&mut *order, next, rider_id, Utc::now())?;

        Ok(Transitioned {
            previous,
            current: order.clone(),
        })
    }
}

#[async_trait]
impl RiderRegistry for InMemoryLedger {
    async fn insert_rider(&self, rider: Rider) -> Result<Rider, AppError> {
        self.ensure_reachable()?;
        self.riders.insert(rider.id, rider.clone());
        Ok(rider)
    }

    async fn get_rider(&self, rider_id: Uuid) -> Result<Option<Rider>, AppError> {
        self.ensure_reachable()?;
        Ok(self.riders.get(&rider_id).map(|entry| entry.value().clone()))
    }

    async fn rider_by_user(&self, user_id: Uuid) -> Result<Option<Rider>, AppError> {
        self.ensure_reachable()?;
        Ok(self
            .riders
            .iter()
            .find(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone()))
    }

    async fn list_riders(&self) -> Result<Vec<Rider>, AppError> {
        self.ensure_reachable()?;
        Ok(self
            .riders
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn claim(&self, rider_id: Uuid) -> Result<Rider, AppError> {
        self.ensure_reachable()?;
        let mut rider = self
            .riders
            .get_mut(&rider_id)
            .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))?;

        if !rider.is_available {
            return Err(AppError::RiderUnavailable(rider_id));
        }

        let before = rider.clone();
        rider.is_available = false;
        rider.last_assigned = Some(Utc::now());
        Ok(before)
    }

    async fn revert_claim(
        &self,
        rider_id: Uuid,
        last_assigned: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        self.ensure_reachable()?;
        let mut rider = self
            .riders
            .get_mut(&rider_id)
            .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))?;

        if rider.is_available {
            return Ok(false);
        }
        rider.is_available = true;
        rider.last_assigned = last_assigned;
        Ok(true)
    }

    async fn set_availability(
        &self,
        rider_id: Uuid,
        expected: bool,
        available: bool,
    ) -> Result<bool, AppError> {
        self.ensure_reachable()?;
        let mut rider = self
            .riders
            .get_mut(&rider_id)
            .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))?;

        if rider.is_available != expected {
            return Ok(false);
        }
        rider.is_available = available;
        Ok(true)
    }
}

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::grid::{CellKey, GridIndex};
use crate::geo::haversine_m;
use crate::models::location::{GeoPoint, LocationUpdate, NearbyLocation, RiderLocation};
use crate::models::order::OrderStatus;
use crate::models::tracking::{OrderTracking, TrackingHistoryEntry, TrackingPatch};
use crate::store::LocationStore;

/// Geospatial side: one document per rider position and per order tracking
/// snapshot, plus an append-only status history per order. Only online
/// riders are kept in the grid.
///
/// Lock order is rider entry, then grid cell. Queries release the grid
/// before they read rider entries.
pub struct InMemoryLocationStore {
    locations: DashMap<Uuid, RiderLocation>,
    tracking: DashMap<Uuid, OrderTracking>,
    history: DashMap<Uuid, Vec<TrackingHistoryEntry>>,
    grid: GridIndex,
    reachable: AtomicBool,
}

impl InMemoryLocationStore {
    pub fn new(cell_degrees: f64) -> Self {
        Self {
            locations: DashMap::new(),
            tracking: DashMap::new(),
            history: DashMap::new(),
            grid: GridIndex::new(cell_degrees),
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
            Err(AppError::StoreUnavailable("location store unreachable".to_string()))
        }
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    pub fn tracking_count(&self) -> usize {
        self.tracking.len()
    }

    fn indexed_cell(&self, location: &RiderLocation) -> Option<CellKey> {
        location
            .is_online
            .then(|| self.grid.cell_for(&location.location))
    }
}

#[async_trait]
impl LocationStore for InMemoryLocationStore {
    async fn upsert_location(
        &self,
        rider_id: Uuid,
        update: LocationUpdate,
    ) -> Result<RiderLocation, AppError> {
        self.ensure_reachable()?;
        let now = Utc::now();

        match self.locations.entry(rider_id) {
            Entry::Occupied(mut entry) => {
                let stored = entry.get_mut();
                let from = self.indexed_cell(stored);
                stored.apply(update, now);
                let to = self.indexed_cell(stored);
                self.grid.relocate(rider_id, from, to);
                Ok(stored.clone())
            }
            Entry::Vacant(entry) => {
                let stored = RiderLocation::from_update(rider_id, update, now);
                let to = self.indexed_cell(&stored);
                self.grid.relocate(rider_id, None, to);
                Ok(entry.insert(stored).clone())
            }
        }
    }

    async fn get_location(&self, rider_id: Uuid) -> Result<Option<RiderLocation>, AppError> {
        self.ensure_reachable()?;
        Ok(self.locations.get(&rider_id).map(|entry| entry.value().clone()))
    }

    async fn list_locations(&self) -> Result<Vec<RiderLocation>, AppError> {
        self.ensure_reachable()?;
        Ok(self
            .locations
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn find_nearby(
        &self,
        center: &GeoPoint,
        radius_m: f64,
    ) -> Result<Vec<NearbyLocation>, AppError> {
        self.ensure_reachable()?;
        center.validate()?;
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(AppError::Validation(format!(
                "radius must be a non-negative number of meters, got {radius_m}"
            )));
        }

        let candidates = self.grid.candidates(center, radius_m);

        let mut nearby: Vec<NearbyLocation> = candidates
            .into_iter()
            .filter_map(|rider_id| {
                let entry = self.locations.get(&rider_id)?;
                let location = entry.value();
                if !location.is_online {
                    return None;
                }
                let distance_m = haversine_m(center, &location.location);
                if distance_m > radius_m {
                    return None;
                }
                Some(NearbyLocation {
                    location: location.clone(),
                    distance_m,
                })
            })
            .collect();

        nearby.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.location.rider_id.cmp(&b.location.rider_id))
        });
        Ok(nearby)
    }

    async fn set_current_order(
        &self,
        rider_id: Uuid,
        order_id: Option<Uuid>,
    ) -> Result<bool, AppError> {
        self.ensure_reachable()?;
        match self.locations.get_mut(&rider_id) {
            Some(mut location) => {
                location.current_order_id = order_id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_current_order(
        &self,
        rider_id: Uuid,
        order_id: Uuid,
    ) -> Result<bool, AppError> {
        self.ensure_reachable()?;
        match self.locations.get_mut(&rider_id) {
            Some(mut location) if location.current_order_id == Some(order_id) => {
                location.current_order_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_tracking(
        &self,
        order_id: Uuid,
        patch: TrackingPatch,
    ) -> Result<OrderTracking, AppError> {
        self.ensure_reachable()?;
        let now = Utc::now();
        let mut tracking = self
            .tracking
            .entry(order_id)
            .or_insert_with(|| OrderTracking::new(order_id, now));
        tracking.merge(patch, now);
        Ok(tracking.clone())
    }

    async fn get_tracking(&self, order_id: Uuid) -> Result<Option<OrderTracking>, AppError> {
        self.ensure_reachable()?;
        Ok(self.tracking.get(&order_id).map(|entry| entry.value().clone()))
    }

    async fn list_tracking(&self) -> Result<Vec<OrderTracking>, AppError> {
        self.ensure_reachable()?;
        Ok(self
            .tracking
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn force_tracking_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
    ) -> Result<Option<OrderTracking>, AppError> {
        self.ensure_reachable()?;
        match self.tracking.get_mut(&order_id) {
            Some(mut tracking) if tracking.status == expected => {
                tracking.status = status;
                tracking.updated_at = Utc::now();
                Ok(Some(tracking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn append_history(&self, entry: TrackingHistoryEntry) -> Result<(), AppError> {
        self.ensure_reachable()?;
        self.history.entry(entry.order_id).or_default().push(entry);
        Ok(())
    }

    async fn list_history(&self, order_id: Uuid) -> Result<Vec<TrackingHistoryEntry>, AppError> {
        self.ensure_reachable()?;
        Ok(self
            .history
            .get(&order_id)
            .map(|entries| entries.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}

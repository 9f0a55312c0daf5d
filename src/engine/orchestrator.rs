//! Cross-store sequencing.
//!
//! Every logical event becomes an ordered list of single-store writes. The
//! ledger write comes first and decides legality; writes after it are best
//! effort and only logged on failure, since reconciliation brings the
//! location store back in line with the ledger.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::event::TrackingEvent;
use crate::models::location::{GeoPoint, LocationUpdate, NearbyLocation, RiderLocation};
use crate::models::order::{Order, OrderFilter, OrderStatus};
use crate::models::rider::{Rider, RiderPresence};
use crate::models::tracking::{
    HistoryNote, OrderTracking, TrackedOrder, TrackingHistoryEntry, TrackingPatch,
};
use crate::observability::metrics::Metrics;
use crate::store::{LocationStore, OrderLedger, RiderRegistry, Transitioned};

/// A rider claimed this recently may still be mid-assignment; automatic
/// paths leave its availability alone until the window passes.
pub const CLAIM_GRACE_SECS: i64 = 60;

pub struct TrackingOrchestrator {
    pub(crate) ledger: Arc<dyn OrderLedger>,
    pub(crate) registry: Arc<dyn RiderRegistry>,
    pub(crate) locations: Arc<dyn LocationStore>,
    pub(crate) events_tx: broadcast::Sender<TrackingEvent>,
    pub(crate) metrics: Metrics,
    default_radius_m: f64,
}

impl TrackingOrchestrator {
    pub fn new(
        ledger: Arc<dyn OrderLedger>,
        registry: Arc<dyn RiderRegistry>,
        locations: Arc<dyn LocationStore>,
        metrics: Metrics,
        event_buffer_size: usize,
        default_radius_m: f64,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        Self {
            ledger,
            registry,
            locations,
            events_tx,
            metrics,
            default_radius_m,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events_tx.subscribe()
    }

    pub fn default_radius_m(&self) -> f64 {
        self.default_radius_m
    }

    pub(crate) fn publish(&self, event: TrackingEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Swallow a post-commit failure: log it, count it, move on.
    pub(crate) fn best_effort<T>(
        &self,
        store: &'static str,
        step: &'static str,
        result: Result<T, AppError>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.metrics
                    .downstream_write_failures_total
                    .with_label_values(&[store])
                    .inc();
                warn!(store, step, error = %err, "downstream write failed; left for reconciliation");
                None
            }
        }
    }

    pub(crate) async fn require_order(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.ledger
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    async fn require_rider(&self, rider_id: Uuid) -> Result<Rider, AppError> {
        self.registry
            .get_rider(rider_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))
    }

    pub async fn rider_for_user(&self, user_id: Uuid) -> Result<Rider, AppError> {
        self.registry
            .rider_by_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no rider registered for user {user_id}")))
    }

    /// Whether an automatic path may flip this rider back to available.
    pub(crate) async fn may_release(&self, rider: &Rider) -> Result<bool, AppError> {
        let grace_over = rider
            .last_assigned
            .is_none_or(|at| Utc::now() - at > Duration::seconds(CLAIM_GRACE_SECS));
        if !grace_over {
            return Ok(false);
        }

        let active = self
            .ledger
            .list_orders(&OrderFilter::active_for_rider(rider.id))
            .await?;
        Ok(active.is_empty())
    }

    pub async fn update_rider_location(
        &self,
        rider_id: Uuid,
        update: LocationUpdate,
    ) -> Result<RiderLocation, AppError> {
        update.validate()?;
        let rider = self.require_rider(rider_id).await?;

        let location = self.locations.upsert_location(rider_id, update).await?;
        self.metrics.location_updates_total.inc();

        if !location.is_online && rider.is_available {
            if let Some(true) = self.best_effort(
                "registry",
                "mark_unavailable",
                self.registry.set_availability(rider_id, true, false).await,
            ) {
                info!(rider_id = %rider_id, "rider went offline; marked unavailable");
            }
        } else if location.is_online
            && !rider.is_available
            && location.current_order_id.is_none()
        {
            let releasable = self.best_effort(
                "ledger",
                "check_active_orders",
                self.may_release(&rider).await,
            );
            if releasable == Some(true) {
                if let Some(true) = self.best_effort(
                    "registry",
                    "mark_available",
                    self.registry.set_availability(rider_id, false, true).await,
                ) {
                    info!(rider_id = %rider_id, "rider came online; marked available");
                }
            }
        }

        self.publish(TrackingEvent::RiderMoved {
            rider_id,
            location: location.location,
            is_online: location.is_online,
        });

        Ok(location)
    }

    pub async fn get_rider_location(&self, rider_id: Uuid) -> Result<RiderLocation, AppError> {
        self.locations
            .get_location(rider_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no location for rider {rider_id}")))
    }

    pub async fn list_online_riders(&self) -> Result<Vec<RiderPresence>, AppError> {
        let locations = self.locations.list_locations().await?;
        let mut riders = Vec::new();
        for location in locations.into_iter().filter(|l| l.is_online) {
            if let Some(rider) = self.registry.get_rider(location.rider_id).await? {
                riders.push(RiderPresence {
                    rider,
                    location,
                    distance_m: None,
                });
            }
        }
        Ok(riders)
    }

    pub(crate) async fn nearby_locations(
        &self,
        center: &GeoPoint,
        radius_m: f64,
    ) -> Result<Vec<NearbyLocation>, AppError> {
        let start = Instant::now();
        let result = self.locations.find_nearby(center, radius_m).await;
        self.metrics
            .nearby_query_latency_seconds
            .observe(start.elapsed().as_secs_f64());
        result
    }

    /// Online riders within `radius_m` (default radius when `None`), nearest
    /// first, joined with their registry rows.
    pub async fn find_nearby_riders(
        &self,
        center: GeoPoint,
        radius_m: Option<f64>,
    ) -> Result<Vec<RiderPresence>, AppError> {
        let radius_m = radius_m.unwrap_or(self.default_radius_m);
        let nearby = self.nearby_locations(&center, radius_m).await?;

        let mut riders = Vec::with_capacity(nearby.len());
        for found in nearby {
            if let Some(rider) = self.registry.get_rider(found.location.rider_id).await? {
                riders.push(RiderPresence {
                    rider,
                    location: found.location,
                    distance_m: Some(found.distance_m),
                });
            }
        }
        Ok(riders)
    }

    /// Manual assignment of a specific rider.
    pub async fn assign_rider(
        &self,
        order_id: Uuid,
        rider_id: Uuid,
    ) -> Result<Assignment, AppError> {
        let order = self.require_order(order_id).await?;
        self.bind_rider(&order, rider_id, None, 1).await
    }

    /// The compound "assign" write: claim the rider (CAS on the registry),
    /// commit the ledger transition, then point the rider's location at the
    /// order and mirror the tracking snapshot.
    pub(crate) async fn bind_rider(
        &self,
        order: &Order,
        rider_id: Uuid,
        distance_m: Option<f64>,
        attempts: u32,
    ) -> Result<Assignment, AppError> {
        lifecycle::check(order.status, OrderStatus::Assigned)?;

        let prior = self.registry.claim(rider_id).await?;

        let transitioned = match self
            .ledger
            .transition(order.id, OrderStatus::Assigned, Some(rider_id))
            .await
        {
            Ok(transitioned) => transitioned,
            Err(err) => {
                // hand the rider back exactly as it was before the claim
                self.best_effort(
                    "registry",
                    "undo_claim",
                    self.registry.revert_claim(rider_id, prior.last_assigned).await,
                );
                return Err(err);
            }
        };

        self.best_effort(
            "location",
            "set_current_order",
            self.locations.set_current_order(rider_id, Some(order.id)).await,
        );

        let rider_position = self
            .best_effort(
                "location",
                "read_rider_location",
                self.locations.get_location(rider_id).await,
            )
            .flatten()
            .map(|location| location.location);

        self.best_effort(
            "location",
            "mirror_tracking",
            self.locations
                .upsert_tracking(
                    order.id,
                    TrackingPatch {
                        rider_id: Some(rider_id),
                        status: Some(OrderStatus::Assigned),
                        location: rider_position,
                        ..TrackingPatch::default()
                    },
                )
                .await,
        );
        self.record_history(order.id, OrderStatus::Assigned, rider_position, None)
            .await;

        let assignment = Assignment {
            order_id: order.id,
            rider_id,
            distance_m,
            attempts,
            assigned_at: transitioned.current.updated_at,
        };

        info!(
            order_id = %order.id,
            rider_id = %rider_id,
            distance_m = ?distance_m,
            attempts,
            "order assigned"
        );
        self.publish(TrackingEvent::OrderAssigned(assignment.clone()));

        Ok(assignment)
    }

    /// Ledger transition plus the registry / location side effects of
    /// reaching a terminal state. Tracking is mirrored by the caller.
    async fn commit_status(
        &self,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<Transitioned, AppError> {
        let transitioned = self.ledger.transition(order_id, next, None).await?;

        if next.is_terminal() {
            if let Some(rider_id) = transitioned.previous.assigned_rider_id {
                self.release_rider(rider_id, order_id).await;
            }
        }

        info!(
            order_id = %order_id,
            from = %transitioned.previous.status,
            to = %next,
            "order status changed"
        );
        self.publish(TrackingEvent::OrderStatusChanged {
            order_id,
            from: transitioned.previous.status,
            to: next,
        });

        Ok(transitioned)
    }

    async fn release_rider(&self, rider_id: Uuid, order_id: Uuid) {
        self.best_effort(
            "location",
            "clear_current_order",
            self.locations.clear_current_order(rider_id, order_id).await,
        );

        let online = self
            .best_effort(
                "location",
                "read_rider_location",
                self.locations.get_location(rider_id).await,
            )
            .map(|location| location.is_none_or(|l| l.is_online))
            .unwrap_or(false);

        if online {
            self.best_effort(
                "registry",
                "release_rider",
                self.registry.set_availability(rider_id, false, true).await,
            );
        } else {
            debug!(rider_id = %rider_id, "rider offline; staying unavailable");
        }
    }

    /// Append to the order's history; a lost entry is not worth failing
    /// the write that produced it.
    async fn record_history(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        location: Option<GeoPoint>,
        notes: Option<String>,
    ) {
        let entry = TrackingHistoryEntry::new(order_id, status, location, notes, Utc::now());
        self.best_effort(
            "location",
            "append_history",
            self.locations.append_history(entry).await,
        );
    }

    fn ensure_actor(order: &Order, acting_rider: Option<Uuid>) -> Result<(), AppError> {
        match acting_rider {
            Some(rider_id) if order.assigned_rider_id != Some(rider_id) => Err(
                AppError::Forbidden(format!("order {} is not assigned to this rider", order.id)),
            ),
            _ => Ok(()),
        }
    }

    /// Move an order along the state machine. `acting_rider` is set when a
    /// rider (not an admin) drives the change.
    pub async fn transition_order(
        &self,
        order_id: Uuid,
        next: OrderStatus,
        acting_rider: Option<Uuid>,
    ) -> Result<Order, AppError> {
        let order = self.require_order(order_id).await?;
        Self::ensure_actor(&order, acting_rider)?;

        let transitioned = self.commit_status(order_id, next).await?;

        let mut patch = TrackingPatch::status(next);
        patch.rider_id = order.assigned_rider_id;
        if next == OrderStatus::Delivered {
            patch.actual_arrival = Some(transitioned.current.updated_at);
        }
        self.best_effort(
            "location",
            "mirror_tracking",
            self.locations.upsert_tracking(order_id, patch).await,
        );
        self.record_history(order_id, next, None, None).await;

        Ok(transitioned.current)
    }

    pub async fn update_order_tracking(
        &self,
        order_id: Uuid,
        acting_rider: Option<Uuid>,
        mut patch: TrackingPatch,
    ) -> Result<OrderTracking, AppError> {
        patch.validate()?;
        let order = self.require_order(order_id).await?;
        Self::ensure_actor(&order, acting_rider)?;

        match patch.status {
            Some(status) if status != order.status => {
                let transitioned = self.commit_status(order_id, status).await?;
                if status == OrderStatus::Delivered && patch.actual_arrival.is_none() {
                    patch.actual_arrival = Some(transitioned.current.updated_at);
                }
            }
            Some(_) => {}
            // a fresh snapshot must start from the ledger, not from pending
            None => patch.status = Some(order.status),
        }
        patch.rider_id = order.assigned_rider_id;

        let location = patch.location;
        let notes = patch.notes.clone();
        let tracking = self.locations.upsert_tracking(order_id, patch).await?;
        self.record_history(order_id, tracking.status, location, notes)
            .await;

        self.publish(TrackingEvent::TrackingUpdated {
            order_id,
            status: tracking.status,
            location: tracking.location,
        });

        Ok(tracking)
    }

    /// Tracking snapshot for an order, with its status checked against the
    /// ledger on the way out.
    ///
    /// Tracking is read before the ledger. Ledger writes always land first,
    /// so the ledger row is never older than the snapshot it is compared to.
    pub async fn get_order_tracking(&self, order_id: Uuid) -> Result<OrderTracking, AppError> {
        let tracking = self.locations.get_tracking(order_id).await?;
        let order = self.require_order(order_id).await?;
        let tracking = tracking
            .ok_or_else(|| AppError::NotFound(format!("no tracking for order {order_id}")))?;

        if tracking.status == order.status {
            return Ok(tracking);
        }

        let repaired = self
            .repair_tracking_status(&order, &tracking, "read_repair")
            .await;
        if let Some(repaired) = repaired {
            return Ok(repaired);
        }

        // the snapshot moved since it was read; hand back the newer one
        let current = self
            .best_effort(
                "location",
                "reread_tracking",
                self.locations.get_tracking(order_id).await,
            )
            .flatten();
        Ok(current.unwrap_or(tracking))
    }

    /// Overwrite a divergent tracking status with the ledger's, provided the
    /// snapshot still holds the status it was observed with.
    pub(crate) async fn repair_tracking_status(
        &self,
        order: &Order,
        tracking: &OrderTracking,
        kind: &'static str,
    ) -> Option<OrderTracking> {
        let divergence = AppError::InconsistencyDetected(format!(
            "order {} ledger={} tracking={}",
            order.id, order.status, tracking.status
        ));
        warn!(order_id = %order.id, error = %divergence, "repairing tracking status");

        let repaired = self
            .best_effort(
                "location",
                "force_tracking_status",
                self.locations
                    .force_tracking_status(order.id, tracking.status, order.status)
                    .await,
            )
            .flatten();

        if repaired.is_some() {
            self.metrics
                .reconciliation_repairs_total
                .with_label_values(&[kind])
                .inc();
        }
        repaired
    }

    /// Status history of an order, newest first.
    pub async fn get_order_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<TrackingHistoryEntry>, AppError> {
        self.require_order(order_id).await?;
        self.locations.list_history(order_id).await
    }

    /// Manual history entry stamped with the order's current ledger status.
    pub async fn add_history_entry(
        &self,
        order_id: Uuid,
        acting_rider: Option<Uuid>,
        note: HistoryNote,
    ) -> Result<TrackingHistoryEntry, AppError> {
        note.validate()?;
        let order = self.require_order(order_id).await?;
        Self::ensure_actor(&order, acting_rider)?;

        let entry =
            TrackingHistoryEntry::new(order_id, order.status, note.location, note.notes, Utc::now());
        self.locations.append_history(entry.clone()).await?;
        debug!(order_id = %order_id, status = %order.status, "history entry added");
        Ok(entry)
    }

    /// Orders the rider currently holds (assigned or picked up).
    pub async fn list_rider_active_orders(&self, rider_id: Uuid) -> Result<Vec<Order>, AppError> {
        self.require_rider(rider_id).await?;
        self.ledger
            .list_orders(&OrderFilter::active_for_rider(rider_id))
            .await
    }

    /// Merged read: ledger row, tracking snapshot and the bound rider's
    /// live position.
    pub async fn get_tracked_order(&self, order_id: Uuid) -> Result<TrackedOrder, AppError> {
        let order = self.require_order(order_id).await?;
        let tracking = match self.get_order_tracking(order_id).await {
            Ok(tracking) => Some(tracking),
            Err(AppError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        let rider_location = match order.assigned_rider_id {
            Some(rider_id) => self.locations.get_location(rider_id).await?,
            None => None,
        };

        Ok(TrackedOrder {
            order,
            tracking,
            rider_location,
        })
    }
}

//! Ledger-wins repair of the location store.
//!
//! A pass walks every order that is non-terminal on either side and every
//! registered rider, and rewrites location-store state (plus rider
//! availability) to agree with the ledger. Order rows are re-read right
//! before each rider repair so a pass never acts on a stale scan.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::orchestrator::TrackingOrchestrator;
use crate::error::AppError;
use crate::models::location::RiderLocation;
use crate::models::order::{Order, OrderFilter};
use crate::models::rider::Rider;
use crate::models::tracking::TrackingPatch;
use crate::state::AppState;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orders_checked: usize,
    pub tracking_created: usize,
    pub tracking_repaired: usize,
    pub riders_checked: usize,
    pub riders_locked: usize,
    pub riders_released: usize,
    pub current_orders_set: usize,
    pub current_orders_cleared: usize,
}

impl ReconcileReport {
    pub fn repairs(&self) -> usize {
        self.tracking_created
            + self.tracking_repaired
            + self.riders_locked
            + self.riders_released
            + self.current_orders_set
            + self.current_orders_cleared
    }
}

impl TrackingOrchestrator {
    pub async fn reconcile(&self) -> Result<ReconcileReport, AppError> {
        let mut report = ReconcileReport::default();

        let tracking: HashMap<Uuid, _> = self
            .locations
            .list_tracking()
            .await?
            .into_iter()
            .map(|t| (t.order_id, t))
            .collect();
        let open_orders = self.ledger.list_orders(&OrderFilter::non_terminal()).await?;

        let mut order_ids: HashSet<Uuid> = open_orders.iter().map(|o| o.id).collect();
        order_ids.extend(
            tracking
                .values()
                .filter(|t| !t.status.is_terminal())
                .map(|t| t.order_id),
        );

        for order_id in order_ids {
            let Some(order) = self.ledger.get_order(order_id).await? else {
                debug!(order_id = %order_id, "tracking snapshot without ledger row");
                continue;
            };
            report.orders_checked += 1;

            match tracking.get(&order_id) {
                Some(snapshot) if snapshot.status != order.status => {
                    if self
                        .repair_tracking_status(&order, snapshot, "tracking_status")
                        .await
                        .is_some()
                    {
                        report.tracking_repaired += 1;
                    }
                }
                None if order.status.holds_rider() => {
                    self.recreate_tracking(&order).await?;
                    report.tracking_created += 1;
                }
                _ => {}
            }
        }

        let holders: HashMap<Uuid, Uuid> = open_orders
            .iter()
            .filter(|o| o.status.holds_rider())
            .filter_map(|o| o.assigned_rider_id.map(|rider_id| (rider_id, o.id)))
            .collect();
        let locations: HashMap<Uuid, RiderLocation> = self
            .locations
            .list_locations()
            .await?
            .into_iter()
            .map(|l| (l.rider_id, l))
            .collect();

        for rider in self.registry.list_riders().await? {
            report.riders_checked += 1;
            let location = locations.get(&rider.id);
            match holders.get(&rider.id) {
                Some(order_id) => {
                    self.reconcile_holder(&rider, location, *order_id, &mut report)
                        .await?
                }
                None => self.reconcile_idle(&rider, location, &mut report).await?,
            }
        }

        if report.repairs() > 0 {
            info!(?report, "reconciliation repaired divergence");
        } else {
            debug!(?report, "reconciliation found nothing to repair");
        }
        Ok(report)
    }

    async fn recreate_tracking(&self, order: &Order) -> Result<(), AppError> {
        let divergence = AppError::InconsistencyDetected(format!(
            "order {} is {} with no tracking snapshot",
            order.id, order.status
        ));
        warn!(order_id = %order.id, error = %divergence, "recreating tracking snapshot");

        let rider_position = match order.assigned_rider_id {
            Some(rider_id) => self
                .locations
                .get_location(rider_id)
                .await?
                .map(|l| l.location),
            None => None,
        };

        self.locations
            .upsert_tracking(
                order.id,
                TrackingPatch {
                    rider_id: order.assigned_rider_id,
                    status: Some(order.status),
                    location: rider_position,
                    ..TrackingPatch::default()
                },
            )
            .await?;
        self.metrics
            .reconciliation_repairs_total
            .with_label_values(&["tracking_created"])
            .inc();
        Ok(())
    }

    async fn still_holds(&self, rider_id: Uuid, order_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .ledger
            .get_order(order_id)
            .await?
            .is_some_and(|o| o.status.holds_rider() && o.assigned_rider_id == Some(rider_id)))
    }

    async fn reconcile_holder(
        &self,
        rider: &Rider,
        location: Option<&RiderLocation>,
        order_id: Uuid,
        report: &mut ReconcileReport,
    ) -> Result<(), AppError> {
        if !self.still_holds(rider.id, order_id).await? {
            return Ok(());
        }

        if rider.is_available && self.registry.set_availability(rider.id, true, false).await? {
            warn!(rider_id = %rider.id, order_id = %order_id, "rider with active order was available");
            self.metrics
                .reconciliation_repairs_total
                .with_label_values(&["rider_locked"])
                .inc();
            report.riders_locked += 1;
        }

        if let Some(location) = location {
            if location.current_order_id != Some(order_id)
                && self
                    .locations
                    .set_current_order(rider.id, Some(order_id))
                    .await?
            {
                warn!(rider_id = %rider.id, order_id = %order_id, "current order pointer was stale");
                self.metrics
                    .reconciliation_repairs_total
                    .with_label_values(&["current_order_set"])
                    .inc();
                report.current_orders_set += 1;
            }
        }
        Ok(())
    }

    async fn reconcile_idle(
        &self,
        rider: &Rider,
        location: Option<&RiderLocation>,
        report: &mut ReconcileReport,
    ) -> Result<(), AppError> {
        if let Some(stale) = location.and_then(|l| l.current_order_id) {
            if !self.still_holds(rider.id, stale).await?
                && self.locations.clear_current_order(rider.id, stale).await?
            {
                warn!(rider_id = %rider.id, order_id = %stale, "cleared pointer to finished order");
                self.metrics
                    .reconciliation_repairs_total
                    .with_label_values(&["current_order_cleared"])
                    .inc();
                report.current_orders_cleared += 1;
            }
        }

        let online = location.is_some_and(|l| l.is_online);
        if !rider.is_available
            && online
            && self.may_release(rider).await?
            && self.registry.set_availability(rider.id, false, true).await?
        {
            warn!(rider_id = %rider.id, "idle online rider was left unavailable");
            self.metrics
                .reconciliation_repairs_total
                .with_label_values(&["rider_released"])
                .inc();
            report.riders_released += 1;
        }
        Ok(())
    }
}

/// Periodic reconciliation pass.
pub async fn run_reconciler(state: Arc<AppState>, every: Duration) {
    info!(interval_secs = every.as_secs(), "reconciler started");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(err) = state.orchestrator.reconcile().await {
            error!(error = %err, "reconciliation pass failed");
        }
    }
}

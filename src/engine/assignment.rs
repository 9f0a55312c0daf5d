use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::engine::orchestrator::TrackingOrchestrator;
use crate::engine::queue::{enqueue_dispatch, DispatchJob};
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::location::RiderLocation;
use crate::models::order::OrderStatus;
use crate::models::rider::Rider;
use crate::state::AppState;

/// Distances closer than this are a tie and fall through to idle time.
const DISTANCE_RESOLUTION_M: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub rider: Rider,
    pub location: RiderLocation,
    pub distance_m: f64,
}

fn distance_bucket(candidate: &Candidate) -> u64 {
    (candidate.distance_m / DISTANCE_RESOLUTION_M).floor() as u64
}

/// Nearest first; equal distance goes to the rider idle longest (never
/// assigned counts as idle forever).
pub fn rank_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        distance_bucket(a)
            .cmp(&distance_bucket(b))
            .then_with(|| a.rider.last_assigned.cmp(&b.rider.last_assigned))
            .then_with(|| a.rider.id.cmp(&b.rider.id))
    });
    candidates
}

impl TrackingOrchestrator {
    /// Bind a pending order to the nearest available online rider within
    /// `radius_m` of its pickup, walking down the ranking when a rider is
    /// taken by a concurrent assignment.
    pub async fn assign_nearest_rider(
        &self,
        order_id: Uuid,
        radius_m: Option<f64>,
    ) -> Result<Assignment, AppError> {
        let start = Instant::now();
        let radius_m = radius_m.unwrap_or(self.default_radius_m());
        let result = self.dispatch_nearest(order_id, radius_m).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(AppError::NoRiderAvailable) => "no_rider",
            Err(_) => "error",
        };
        self.metrics
            .assignment_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn dispatch_nearest(
        &self,
        order_id: Uuid,
        radius_m: f64,
    ) -> Result<Assignment, AppError> {
        let order = self.require_order(order_id).await?;
        lifecycle::check(order.status, OrderStatus::Assigned)?;

        let nearby = self.nearby_locations(&order.pickup, radius_m).await?;

        let mut candidates = Vec::with_capacity(nearby.len());
        for found in nearby {
            match self.registry.get_rider(found.location.rider_id).await? {
                Some(rider) if rider.is_available => candidates.push(Candidate {
                    rider,
                    location: found.location,
                    distance_m: found.distance_m,
                }),
                _ => {}
            }
        }

        if candidates.is_empty() {
            warn!(order_id = %order_id, radius_m, "no available rider in range");
            return Err(AppError::NoRiderAvailable);
        }

        for (index, candidate) in rank_candidates(candidates).iter().enumerate() {
            let attempts = index as u32 + 1;
            match self
                .bind_rider(&order, candidate.rider.id, Some(candidate.distance_m), attempts)
                .await
            {
                Ok(assignment) => return Ok(assignment),
                Err(AppError::RiderUnavailable(rider_id)) => {
                    self.metrics.assignment_races_total.inc();
                    debug!(
                        order_id = %order_id,
                        rider_id = %rider_id,
                        "rider taken by concurrent assignment; trying next"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        warn!(order_id = %order_id, "every candidate was taken");
        Err(AppError::NoRiderAvailable)
    }
}

/// Background dispatch: runs nearest-rider assignment for queued orders and
/// re-queues after a delay while no rider is in range.
pub async fn run_dispatch_worker(state: Arc<AppState>, mut dispatch_rx: mpsc::Receiver<DispatchJob>) {
    info!("dispatch worker started");

    while let Some(job) = dispatch_rx.recv().await {
        state.metrics.dispatch_queue_depth.dec();

        match state.orchestrator.assign_nearest_rider(job.order_id, None).await {
            Ok(assignment) => {
                info!(
                    order_id = %assignment.order_id,
                    rider_id = %assignment.rider_id,
                    attempt = job.attempt,
                    "queued order dispatched"
                );
            }
            Err(AppError::NoRiderAvailable) if job.attempt < state.dispatch.max_attempts => {
                warn!(
                    order_id = %job.order_id,
                    attempt = job.attempt,
                    "no rider available; re-queueing order"
                );
                let state = state.clone();
                let delay = state.dispatch.retry_delay;
                tokio::spawn(async move {
                    sleep(delay).await;
                    if let Err(err) = enqueue_dispatch(&state, job.retry()).await {
                        error!(order_id = %job.order_id, error = %err, "failed to re-queue order");
                    }
                });
            }
            Err(AppError::NoRiderAvailable) => {
                warn!(
                    order_id = %job.order_id,
                    attempts = job.attempt,
                    "giving up on queued dispatch"
                );
            }
            Err(err) => {
                error!(order_id = %job.order_id, error = %err, "failed to dispatch order");
            }
        }
    }

    warn!("dispatch worker stopped: queue channel closed");
}

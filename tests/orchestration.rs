use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rider_tracker::config::Config;
use rider_tracker::engine::orchestrator::TrackingOrchestrator;
use rider_tracker::error::AppError;
use rider_tracker::models::location::{
    GeoPoint, LocationUpdate, NearbyLocation, RiderLocation, Telemetry,
};
use rider_tracker::models::order::{NewOrder, Order, OrderFilter, OrderStatus};
use rider_tracker::models::rider::Rider;
use rider_tracker::models::tracking::{
    HistoryNote, OrderTracking, TrackingHistoryEntry, TrackingPatch,
};
use rider_tracker::observability::metrics::Metrics;
use rider_tracker::state::AppState;
use rider_tracker::store::{
    InMemoryLedger, InMemoryLocationStore, LocationStore, OrderLedger, RiderRegistry,
    Transitioned,
};
use uuid::Uuid;

fn setup() -> Arc<AppState> {
    let (state, _rx) = AppState::new(&Config::default());
    Arc::new(state)
}

async fn seed_order(state: &AppState, pickup: GeoPoint) -> Order {
    let order = Order::create(NewOrder {
        customer_name: "Meera".to_string(),
        customer_phone: "555-0142".to_string(),
        pickup_address: "Cubbon Park".to_string(),
        pickup,
        dropoff_address: "Ulsoor Lake".to_string(),
        dropoff: GeoPoint::new(12.9830, 77.6190),
        distance_km: 3.4,
        price_cents: 8_000,
        created_by: Uuid::new_v4(),
    });
    state.ledger.insert_order(order).await.unwrap()
}

async fn seed_rider(state: &AppState, at: Option<GeoPoint>) -> Rider {
    let rider = state
        .ledger
        .insert_rider(Rider::new(Uuid::new_v4()))
        .await
        .unwrap();
    if let Some(point) = at {
        state
            .orchestrator
            .update_rider_location(rider.id, LocationUpdate::online(point))
            .await
            .unwrap();
    }
    rider
}

fn offline(point: GeoPoint) -> LocationUpdate {
    LocationUpdate {
        location: point,
        is_online: false,
        telemetry: Telemetry::default(),
    }
}

const PICKUP: GeoPoint = GeoPoint {
    lat: 12.9710,
    lng: 77.5910,
};

#[tokio::test]
async fn nearby_scenario_respects_radius() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;

    let wide = state
        .orchestrator
        .find_nearby_riders(PICKUP, Some(5_000.0))
        .await
        .unwrap();
    assert_eq!(wide.len(), 1);
    assert_eq!(wide[0].rider.id, rider.id);
    assert!(wide[0].distance_m.unwrap() <= 5_000.0);

    let narrow = state
        .orchestrator
        .find_nearby_riders(PICKUP, Some(10.0))
        .await
        .unwrap();
    assert!(narrow.is_empty());
}

#[tokio::test]
async fn nearby_results_are_sorted_and_online_only() {
    let state = setup();
    let far = seed_rider(&state, Some(GeoPoint::new(12.9900, 77.6100))).await;
    let near = seed_rider(&state, Some(GeoPoint::new(12.9712, 77.5912))).await;
    let gone = seed_rider(&state, Some(GeoPoint::new(12.9711, 77.5911))).await;

    state
        .orchestrator
        .update_rider_location(gone.id, offline(GeoPoint::new(12.9711, 77.5911)))
        .await
        .unwrap();

    let found = state
        .orchestrator
        .find_nearby_riders(PICKUP, None)
        .await
        .unwrap();
    let ids: Vec<Uuid> = found.iter().map(|p| p.rider.id).collect();
    assert_eq!(ids, vec![near.id, far.id]);
    assert!(found[0].distance_m <= found[1].distance_m);
}

#[tokio::test]
async fn going_offline_marks_rider_unavailable_and_back() {
    let state = setup();
    let point = GeoPoint::new(12.9700, 77.5900);
    let rider = seed_rider(&state, Some(point)).await;

    state
        .orchestrator
        .update_rider_location(rider.id, offline(point))
        .await
        .unwrap();
    let stored = state.ledger.get_rider(rider.id).await.unwrap().unwrap();
    assert!(!stored.is_available);

    state
        .orchestrator
        .update_rider_location(rider.id, LocationUpdate::online(point))
        .await
        .unwrap();
    let stored = state.ledger.get_rider(rider.id).await.unwrap().unwrap();
    assert!(stored.is_available);
}

#[tokio::test]
async fn later_location_update_is_visible() {
    let state = setup();
    let rider = seed_rider(&state, None).await;

    state
        .orchestrator
        .update_rider_location(
            rider.id,
            LocationUpdate {
                location: GeoPoint::new(12.9700, 77.5900),
                is_online: true,
                telemetry: Telemetry {
                    battery_level: Some(80),
                    speed_kmh: 12.0,
                    heading_deg: 45.0,
                    accuracy_m: 8.0,
                },
            },
        )
        .await
        .unwrap();
    state
        .orchestrator
        .update_rider_location(
            rider.id,
            LocationUpdate {
                location: GeoPoint::new(12.9750, 77.5950),
                is_online: true,
                telemetry: Telemetry {
                    battery_level: Some(79),
                    speed_kmh: 18.0,
                    heading_deg: 50.0,
                    accuracy_m: 6.0,
                },
            },
        )
        .await
        .unwrap();

    let location = state
        .orchestrator
        .get_rider_location(rider.id)
        .await
        .unwrap();
    assert_eq!(location.location, GeoPoint::new(12.9750, 77.5950));
    assert_eq!(location.telemetry.battery_level, Some(79));
    assert_eq!(location.telemetry.speed_kmh, 18.0);
}

#[tokio::test]
async fn malformed_location_is_rejected() {
    let state = setup();
    let rider = seed_rider(&state, None).await;

    let result = state
        .orchestrator
        .update_rider_location(rider.id, LocationUpdate::online(GeoPoint::new(120.0, 77.59)))
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let unknown = state
        .orchestrator
        .update_rider_location(Uuid::new_v4(), LocationUpdate::online(PICKUP))
        .await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn assign_nearest_updates_every_store() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(&state, PICKUP).await;

    let assignment = state
        .orchestrator
        .assign_nearest_rider(order.id, None)
        .await
        .unwrap();
    assert_eq!(assignment.rider_id, rider.id);
    assert_eq!(assignment.attempts, 1);

    let stored = state.ledger.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Assigned);
    assert_eq!(stored.assigned_rider_id, Some(rider.id));

    let rider_row = state.ledger.get_rider(rider.id).await.unwrap().unwrap();
    assert!(!rider_row.is_available);
    assert!(rider_row.last_assigned.is_some());

    let location = state.locations.get_location(rider.id).await.unwrap().unwrap();
    assert_eq!(location.current_order_id, Some(order.id));

    let tracking = state
        .orchestrator
        .get_order_tracking(order.id)
        .await
        .unwrap();
    assert_eq!(tracking.status, OrderStatus::Assigned);
    assert_eq!(tracking.rider_id, Some(rider.id));
}

#[tokio::test]
async fn unavailable_rider_is_skipped() {
    let state = setup();
    let busy = seed_rider(&state, Some(GeoPoint::new(12.9711, 77.5911))).await;
    let free = seed_rider(&state, Some(GeoPoint::new(12.9800, 77.6000))).await;
    state
        .ledger
        .set_availability(busy.id, true, false)
        .await
        .unwrap();
    let order = seed_order(&state, PICKUP).await;

    let assignment = state
        .orchestrator
        .assign_nearest_rider(order.id, None)
        .await
        .unwrap();
    assert_eq!(assignment.rider_id, free.id);
}

#[tokio::test]
async fn empty_radius_yields_no_rider_available() {
    let state = setup();
    seed_rider(&state, Some(GeoPoint::new(13.2000, 77.7000))).await;
    let order = seed_order(&state, PICKUP).await;

    let result = state
        .orchestrator
        .assign_nearest_rider(order.id, Some(1_000.0))
        .await;
    assert!(matches!(result, Err(AppError::NoRiderAvailable)));

    let stored = state.ledger.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(stored.assigned_rider_id, None);
}

#[tokio::test]
async fn assigning_a_non_pending_order_is_invalid() {
    let state = setup();
    seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(&state, PICKUP).await;
    state
        .orchestrator
        .transition_order(order.id, OrderStatus::Cancelled, None)
        .await
        .unwrap();

    let result = state.orchestrator.assign_nearest_rider(order.id, None).await;
    assert!(matches!(
        result,
        Err(AppError::InvalidTransition {
            from: OrderStatus::Cancelled,
            to: OrderStatus::Assigned
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_on_one_rider_have_one_winner() {
    let state = setup();
    let rider_id = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await.id;
    let first = seed_order(&state, PICKUP).await.id;
    let second = seed_order(&state, PICKUP).await.id;

    let a = {
        let state = state.clone();
        tokio::spawn(async move { state.orchestrator.assign_rider(first, rider_id).await })
    };
    let b = {
        let state = state.clone();
        tokio::spawn(async move { state.orchestrator.assign_rider(second, rider_id).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::RiderUnavailable(id)) if *id == rider_id))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(losers, 1);

    let mut assigned = 0;
    for order_id in [first, second] {
        let order = state.ledger.get_order(order_id).await.unwrap().unwrap();
        if order.status == OrderStatus::Assigned {
            assert_eq!(order.assigned_rider_id, Some(rider_id));
            assigned += 1;
        } else {
            assert_eq!(order.status, OrderStatus::Pending);
        }
    }
    assert_eq!(assigned, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatch_falls_through_to_next_rider() {
    let state = setup();
    let r1 = seed_rider(&state, Some(GeoPoint::new(12.9711, 77.5911))).await;
    let r2 = seed_rider(&state, Some(GeoPoint::new(12.9730, 77.5930))).await;
    let first = seed_order(&state, PICKUP).await.id;
    let second = seed_order(&state, PICKUP).await.id;

    let a = {
        let state = state.clone();
        tokio::spawn(async move { state.orchestrator.assign_nearest_rider(first, None).await })
    };
    let b = {
        let state = state.clone();
        tokio::spawn(async move { state.orchestrator.assign_nearest_rider(second, None).await })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_ne!(a.rider_id, b.rider_id);

    let mut riders = vec![a.rider_id, b.rider_id];
    riders.sort();
    let mut expected = vec![r1.id, r2.id];
    expected.sort();
    assert_eq!(riders, expected);
}

#[tokio::test]
async fn full_lifecycle_releases_rider() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(&state, PICKUP).await;
    state
        .orchestrator
        .assign_nearest_rider(order.id, None)
        .await
        .unwrap();

    state
        .orchestrator
        .transition_order(order.id, OrderStatus::PickedUp, Some(rider.id))
        .await
        .unwrap();
    let delivered = state
        .orchestrator
        .transition_order(order.id, OrderStatus::Delivered, Some(rider.id))
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert_eq!(delivered.assigned_rider_id, None);

    let rider_row = state.ledger.get_rider(rider.id).await.unwrap().unwrap();
    assert!(rider_row.is_available);

    let location = state.locations.get_location(rider.id).await.unwrap().unwrap();
    assert_eq!(location.current_order_id, None);

    let tracking = state
        .orchestrator
        .get_order_tracking(order.id)
        .await
        .unwrap();
    assert_eq!(tracking.status, OrderStatus::Delivered);
    assert!(tracking.actual_arrival.is_some());
    assert_eq!(tracking.rider_id, Some(rider.id));
}

#[tokio::test]
async fn illegal_transition_changes_nothing() {
    let state = setup();
    let order = seed_order(&state, PICKUP).await;

    let result = state
        .orchestrator
        .transition_order(order.id, OrderStatus::Delivered, None)
        .await;
    assert!(matches!(
        result,
        Err(AppError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Delivered
        })
    ));

    let stored = state.ledger.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
    assert!(state.locations.get_tracking(order.id).await.unwrap().is_none());
}

#[tokio::test]
async fn tracking_update_merges_and_guards_owner() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(&state, PICKUP).await;
    state
        .orchestrator
        .assign_nearest_rider(order.id, None)
        .await
        .unwrap();

    let stranger = seed_rider(&state, None).await;
    let forbidden = state
        .orchestrator
        .update_order_tracking(order.id, Some(stranger.id), TrackingPatch::default())
        .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden(_))));

    state
        .orchestrator
        .update_order_tracking(
            order.id,
            Some(rider.id),
            TrackingPatch {
                notes: Some("leave at reception".to_string()),
                ..TrackingPatch::default()
            },
        )
        .await
        .unwrap();

    let merged = state
        .orchestrator
        .update_order_tracking(
            order.id,
            Some(rider.id),
            TrackingPatch {
                status: Some(OrderStatus::PickedUp),
                location: Some(GeoPoint::new(12.9720, 77.5920)),
                ..TrackingPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(merged.status, OrderStatus::PickedUp);
    assert_eq!(merged.location, Some(GeoPoint::new(12.9720, 77.5920)));
    assert_eq!(merged.notes.as_deref(), Some("leave at reception"));

    let stored = state.ledger.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::PickedUp);
}

#[tokio::test]
async fn illegal_status_in_tracking_update_applies_nothing() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(&state, PICKUP).await;
    state
        .orchestrator
        .assign_nearest_rider(order.id, None)
        .await
        .unwrap();

    let result = state
        .orchestrator
        .update_order_tracking(
            order.id,
            Some(rider.id),
            TrackingPatch {
                status: Some(OrderStatus::Delivered),
                notes: Some("should not land".to_string()),
                ..TrackingPatch::default()
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::InvalidTransition { .. })));

    let tracking = state.locations.get_tracking(order.id).await.unwrap().unwrap();
    assert_eq!(tracking.status, OrderStatus::Assigned);
    assert_eq!(tracking.notes, None);
}

#[tokio::test]
async fn tracking_for_unknown_order_is_not_found() {
    let state = setup();
    let result = state
        .orchestrator
        .update_order_tracking(Uuid::new_v4(), None, TrackingPatch::default())
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let order = seed_order(&state, PICKUP).await;
    let missing = state.orchestrator.get_order_tracking(order.id).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

/// Walk an order to picked_up, then deliver it while the location store is
/// down so the tracking mirror is lost.
async fn diverged_delivery(state: &AppState) -> (Order, Rider) {
    let rider = seed_rider(state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(state, PICKUP).await;
    state
        .orchestrator
        .assign_nearest_rider(order.id, None)
        .await
        .unwrap();
    state
        .orchestrator
        .transition_order(order.id, OrderStatus::PickedUp, None)
        .await
        .unwrap();

    state.locations.set_reachable(false);
    state
        .orchestrator
        .transition_order(order.id, OrderStatus::Delivered, None)
        .await
        .unwrap();
    state.locations.set_reachable(true);

    let tracking = state.locations.get_tracking(order.id).await.unwrap().unwrap();
    assert_eq!(tracking.status, OrderStatus::PickedUp);
    (order, rider)
}

#[tokio::test]
async fn reconciliation_lets_ledger_win() {
    let state = setup();
    let (order, rider) = diverged_delivery(&state).await;
    let ledger_before = state.ledger.get_order(order.id).await.unwrap().unwrap();

    let report = state.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.tracking_repaired, 1);
    assert_eq!(report.current_orders_cleared, 1);

    let tracking = state.locations.get_tracking(order.id).await.unwrap().unwrap();
    assert_eq!(tracking.status, OrderStatus::Delivered);

    let ledger_after = state.ledger.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(ledger_after.status, OrderStatus::Delivered);
    assert_eq!(ledger_after.updated_at, ledger_before.updated_at);

    let location = state.locations.get_location(rider.id).await.unwrap().unwrap();
    assert_eq!(location.current_order_id, None);

    let again = state.orchestrator.reconcile().await.unwrap();
    assert_eq!(again.tracking_repaired, 0);
    assert_eq!(again.current_orders_cleared, 0);
}

#[tokio::test]
async fn reading_tracking_repairs_divergence() {
    let state = setup();
    let (order, _rider) = diverged_delivery(&state).await;

    let tracking = state
        .orchestrator
        .get_order_tracking(order.id)
        .await
        .unwrap();
    assert_eq!(tracking.status, OrderStatus::Delivered);

    let stored = state.locations.get_tracking(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Delivered);
}

#[tokio::test]
async fn reconciliation_restores_lost_assignment_writes() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(&state, PICKUP).await;

    state.locations.set_reachable(false);
    state
        .orchestrator
        .assign_rider(order.id, rider.id)
        .await
        .unwrap();
    state.locations.set_reachable(true);

    assert!(state.locations.get_tracking(order.id).await.unwrap().is_none());

    let report = state.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.tracking_created, 1);
    assert_eq!(report.current_orders_set, 1);

    let tracking = state.locations.get_tracking(order.id).await.unwrap().unwrap();
    assert_eq!(tracking.status, OrderStatus::Assigned);
    assert_eq!(tracking.rider_id, Some(rider.id));

    let location = state.locations.get_location(rider.id).await.unwrap().unwrap();
    assert_eq!(location.current_order_id, Some(order.id));
}

#[tokio::test]
async fn ledger_outage_is_surfaced() {
    let state = setup();
    let order = seed_order(&state, PICKUP).await;
    state.ledger.set_reachable(false);

    let result = state.orchestrator.assign_nearest_rider(order.id, None).await;
    assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
}

#[tokio::test]
async fn merged_read_joins_all_three_sources() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(&state, PICKUP).await;
    state
        .orchestrator
        .assign_nearest_rider(order.id, None)
        .await
        .unwrap();

    let view = state.orchestrator.get_tracked_order(order.id).await.unwrap();
    assert_eq!(view.order.status, OrderStatus::Assigned);
    assert_eq!(view.order.price_cents, 8_000);
    assert_eq!(view.tracking.unwrap().rider_id, Some(rider.id));
    assert_eq!(
        view.rider_location.unwrap().location,
        GeoPoint::new(12.9700, 77.5900)
    );
}

#[tokio::test]
async fn location_only_update_starts_from_ledger_status() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(&state, PICKUP).await;

    state.locations.set_reachable(false);
    state
        .orchestrator
        .assign_rider(order.id, rider.id)
        .await
        .unwrap();
    state.locations.set_reachable(true);
    assert!(state.locations.get_tracking(order.id).await.unwrap().is_none());

    let tracking = state
        .orchestrator
        .update_order_tracking(
            order.id,
            Some(rider.id),
            TrackingPatch {
                location: Some(GeoPoint::new(12.9705, 77.5905)),
                ..TrackingPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(tracking.status, OrderStatus::Assigned);
    assert_eq!(tracking.rider_id, Some(rider.id));

    let read = state
        .orchestrator
        .get_order_tracking(order.id)
        .await
        .unwrap();
    assert_eq!(read.status, OrderStatus::Assigned);
}

#[tokio::test]
async fn history_records_each_step_newest_first() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(&state, PICKUP).await;

    state
        .orchestrator
        .assign_rider(order.id, rider.id)
        .await
        .unwrap();
    state
        .orchestrator
        .transition_order(order.id, OrderStatus::PickedUp, Some(rider.id))
        .await
        .unwrap();
    state
        .orchestrator
        .update_order_tracking(
            order.id,
            Some(rider.id),
            TrackingPatch {
                location: Some(GeoPoint::new(12.9750, 77.6000)),
                notes: Some("stuck at signal".to_string()),
                ..TrackingPatch::default()
            },
        )
        .await
        .unwrap();
    state
        .orchestrator
        .transition_order(order.id, OrderStatus::Delivered, Some(rider.id))
        .await
        .unwrap();

    let history = state.orchestrator.get_order_history(order.id).await.unwrap();
    let statuses: Vec<OrderStatus> = history.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            OrderStatus::Delivered,
            OrderStatus::PickedUp,
            OrderStatus::PickedUp,
            OrderStatus::Assigned,
        ]
    );
    assert_eq!(history[1].notes.as_deref(), Some("stuck at signal"));
    assert_eq!(history[1].location, Some(GeoPoint::new(12.9750, 77.6000)));
    assert_eq!(history[3].location, Some(GeoPoint::new(12.9700, 77.5900)));
    assert!(history.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test]
async fn manual_history_entry_takes_ledger_status() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let other = seed_rider(&state, None).await;
    let order = seed_order(&state, PICKUP).await;
    state
        .orchestrator
        .assign_rider(order.id, rider.id)
        .await
        .unwrap();

    let entry = state
        .orchestrator
        .add_history_entry(
            order.id,
            None,
            HistoryNote {
                location: None,
                notes: Some("customer asked to wait".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(entry.status, OrderStatus::Assigned);

    let latest = state.orchestrator.get_order_history(order.id).await.unwrap();
    assert_eq!(latest[0].id, entry.id);

    let empty = state
        .orchestrator
        .add_history_entry(order.id, Some(rider.id), HistoryNote::default())
        .await;
    assert!(matches!(empty, Err(AppError::Validation(_))));

    let stranger = state
        .orchestrator
        .add_history_entry(
            order.id,
            Some(other.id),
            HistoryNote {
                location: Some(GeoPoint::new(12.97, 77.59)),
                notes: None,
            },
        )
        .await;
    assert!(matches!(stranger, Err(AppError::Forbidden(_))));

    let unknown = state.orchestrator.get_order_history(Uuid::new_v4()).await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn rider_active_orders_follow_the_lifecycle() {
    let state = setup();
    let rider = seed_rider(&state, Some(GeoPoint::new(12.9700, 77.5900))).await;
    let order = seed_order(&state, PICKUP).await;
    let _unassigned = seed_order(&state, PICKUP).await;

    assert!(state
        .orchestrator
        .list_rider_active_orders(rider.id)
        .await
        .unwrap()
        .is_empty());

    state
        .orchestrator
        .assign_rider(order.id, rider.id)
        .await
        .unwrap();
    state
        .orchestrator
        .transition_order(order.id, OrderStatus::PickedUp, None)
        .await
        .unwrap();

    let active = state
        .orchestrator
        .list_rider_active_orders(rider.id)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, order.id);
    assert_eq!(active[0].status, OrderStatus::PickedUp);

    state
        .orchestrator
        .transition_order(order.id, OrderStatus::Delivered, None)
        .await
        .unwrap();
    assert!(state
        .orchestrator
        .list_rider_active_orders(rider.id)
        .await
        .unwrap()
        .is_empty());

    let unknown = state.orchestrator.list_rider_active_orders(Uuid::new_v4()).await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));
}

/// Location store whose next tracking read races with a pickup landing on
/// both stores, either just before or just after the read.
struct PickupDuringRead {
    inner: Arc<InMemoryLocationStore>,
    ledger: Arc<InMemoryLedger>,
    armed: AtomicBool,
    lands_before_read: bool,
}

impl PickupDuringRead {
    async fn land_pickup(&self, order_id: Uuid) -> Result<(), AppError> {
        self.ledger
            .transition(order_id, OrderStatus::PickedUp, None)
            .await?;
        self.inner
            .upsert_tracking(order_id, TrackingPatch::status(OrderStatus::PickedUp))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LocationStore for PickupDuringRead {
    async fn upsert_location(
        &self,
        rider_id: Uuid,
        update: LocationUpdate,
    ) -> Result<RiderLocation, AppError> {
        self.inner.upsert_location(rider_id, update).await
    }

    async fn get_location(&self, rider_id: Uuid) -> Result<Option<RiderLocation>, AppError> {
        self.inner.get_location(rider_id).await
    }

    async fn list_locations(&self) -> Result<Vec<RiderLocation>, AppError> {
        self.inner.list_locations().await
    }

    async fn find_nearby(
        &self,
        center: &GeoPoint,
        radius_m: f64,
    ) -> Result<Vec<NearbyLocation>, AppError> {
        self.inner.find_nearby(center, radius_m).await
    }

    async fn set_current_order(
        &self,
        rider_id: Uuid,
        order_id: Option<Uuid>,
    ) -> Result<bool, AppError> {
        self.inner.set_current_order(rider_id, order_id).await
    }

    async fn clear_current_order(
        &self,
        rider_id: Uuid,
        order_id: Uuid,
    ) -> Result<bool, AppError> {
        self.inner.clear_current_order(rider_id, order_id).await
    }

    async fn upsert_tracking(
        &self,
        order_id: Uuid,
        patch: TrackingPatch,
    ) -> Result<OrderTracking, AppError> {
        self.inner.upsert_tracking(order_id, patch).await
    }

    async fn get_tracking(&self, order_id: Uuid) -> Result<Option<OrderTracking>, AppError> {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return self.inner.get_tracking(order_id).await;
        }
        if self.lands_before_read {
            self.land_pickup(order_id).await?;
            self.inner.get_tracking(order_id).await
        } else {
            let read = self.inner.get_tracking(order_id).await;
            self.land_pickup(order_id).await?;
            read
        }
    }

    async fn list_tracking(&self) -> Result<Vec<OrderTracking>, AppError> {
        self.inner.list_tracking().await
    }

    async fn force_tracking_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
    ) -> Result<Option<OrderTracking>, AppError> {
        self.inner
            .force_tracking_status(order_id, expected, status)
            .await
    }

    async fn append_history(&self, entry: TrackingHistoryEntry) -> Result<(), AppError> {
        self.inner.append_history(entry).await
    }

    async fn list_history(&self, order_id: Uuid) -> Result<Vec<TrackingHistoryEntry>, AppError> {
        self.inner.list_history(order_id).await
    }
}

async fn read_racing_pickup(lands_before_read: bool) {
    let ledger = Arc::new(InMemoryLedger::new());
    let inner = Arc::new(InMemoryLocationStore::new(0.01));
    let store = Arc::new(PickupDuringRead {
        inner: inner.clone(),
        ledger: ledger.clone(),
        armed: AtomicBool::new(false),
        lands_before_read,
    });
    let orchestrator = TrackingOrchestrator::new(
        ledger.clone(),
        ledger.clone(),
        store.clone(),
        Metrics::new(),
        16,
        5_000.0,
    );

    let rider = ledger.insert_rider(Rider::new(Uuid::new_v4())).await.unwrap();
    orchestrator
        .update_rider_location(rider.id, LocationUpdate::online(GeoPoint::new(12.97, 77.59)))
        .await
        .unwrap();
    let order = ledger
        .insert_order(Order::create(NewOrder {
            customer_name: "Kavya".to_string(),
            customer_phone: "555-0177".to_string(),
            pickup_address: "Church Street".to_string(),
            pickup: PICKUP,
            dropoff_address: "Domlur".to_string(),
            dropoff: GeoPoint::new(12.9610, 77.6387),
            distance_km: 4.1,
            price_cents: 9_500,
            created_by: Uuid::new_v4(),
        }))
        .await
        .unwrap();
    orchestrator.assign_rider(order.id, rider.id).await.unwrap();

    store.armed.store(true, Ordering::SeqCst);
    let tracking = orchestrator.get_order_tracking(order.id).await.unwrap();
    assert_eq!(tracking.status, OrderStatus::PickedUp);

    let stored = inner.get_tracking(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::PickedUp);
    let row = ledger.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(row.status, OrderStatus::PickedUp);
}

#[tokio::test]
async fn read_repair_never_rolls_back_a_pickup_landing_first() {
    read_racing_pickup(true).await;
}

#[tokio::test]
async fn read_repair_never_rolls_back_a_pickup_landing_after() {
    read_racing_pickup(false).await;
}

/// Ledger that refuses every status change.
struct RejectingTransitions {
    inner: Arc<InMemoryLedger>,
}

#[async_trait]
impl OrderLedger for RejectingTransitions {
    async fn insert_order(&self, order: Order) -> Result<Order, AppError> {
        self.inner.insert_order(order).await
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        self.inner.get_order(order_id).await
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, AppError> {
        self.inner.list_orders(filter).await
    }

    async fn transition(
        &self,
        _order_id: Uuid,
        _next: OrderStatus,
        _rider_id: Option<Uuid>,
    ) -> Result<Transitioned, AppError> {
        Err(AppError::StoreUnavailable("ledger write rejected".to_string()))
    }
}

#[tokio::test]
async fn failed_ledger_write_restores_claimed_rider() {
    let ledger = Arc::new(InMemoryLedger::new());
    let locations = Arc::new(InMemoryLocationStore::new(0.01));
    let orchestrator = TrackingOrchestrator::new(
        Arc::new(RejectingTransitions {
            inner: ledger.clone(),
        }),
        ledger.clone(),
        locations,
        Metrics::new(),
        16,
        5_000.0,
    );

    let rider = ledger.insert_rider(Rider::new(Uuid::new_v4())).await.unwrap();
    let order = ledger
        .insert_order(Order::create(NewOrder {
            customer_name: "Rohan".to_string(),
            customer_phone: "555-0123".to_string(),
            pickup_address: "Lalbagh".to_string(),
            pickup: PICKUP,
            dropoff_address: "Jayanagar".to_string(),
            dropoff: GeoPoint::new(12.9250, 77.5938),
            distance_km: 2.8,
            price_cents: 6_000,
            created_by: Uuid::new_v4(),
        }))
        .await
        .unwrap();

    let result = orchestrator.assign_rider(order.id, rider.id).await;
    assert!(matches!(result, Err(AppError::StoreUnavailable(_))));

    let stored = ledger.get_rider(rider.id).await.unwrap().unwrap();
    assert!(stored.is_available);
    assert_eq!(stored.last_assigned, None);

    let row = ledger.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(row.status, OrderStatus::Pending);
}

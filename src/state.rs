use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::engine::orchestrator::TrackingOrchestrator;
use crate::engine::queue::DispatchJob;
use crate::observability::metrics::Metrics;
use crate::store::{InMemoryLedger, InMemoryLocationStore};

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

pub struct AppState {
    pub orchestrator: TrackingOrchestrator,
    pub ledger: Arc<InMemoryLedger>,
    pub locations: Arc<InMemoryLocationStore>,
    pub dispatch_tx: mpsc::Sender<DispatchJob>,
    pub dispatch: DispatchSettings,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<DispatchJob>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size);
        let metrics = Metrics::new();

        let ledger = Arc::new(InMemoryLedger::new());
        let locations = Arc::new(InMemoryLocationStore::new(config.grid_cell_degrees));

        let orchestrator = TrackingOrchestrator::new(
            ledger.clone(),
            ledger.clone(),
            locations.clone(),
            metrics.clone(),
            config.event_buffer_size,
            config.default_search_radius_m,
        );

        (
            Self {
                orchestrator,
                ledger,
                locations,
                dispatch_tx,
                dispatch: DispatchSettings {
                    max_attempts: config.dispatch_max_attempts,
                    retry_delay: Duration::from_millis(config.dispatch_retry_delay_ms),
                },
                metrics,
            },
            dispatch_rx,
        )
    }
}

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub assignment_races_total: IntCounter,
    pub dispatch_queue_depth: IntGauge,
    pub location_updates_total: IntCounter,
    pub nearby_query_latency_seconds: Histogram,
    pub downstream_write_failures_total: IntCounterVec,
    pub reconciliation_repairs_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Total assignments by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of nearest-rider assignment in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let assignment_races_total = IntCounter::new(
            "assignment_races_total",
            "Rider claims lost to a concurrent assignment",
        )
        .expect("valid assignment_races_total metric");

        let dispatch_queue_depth =
            IntGauge::new("dispatch_queue_depth", "Orders waiting for background dispatch")
                .expect("valid dispatch_queue_depth metric");

        let location_updates_total =
            IntCounter::new("location_updates_total", "Accepted rider location updates")
                .expect("valid location_updates_total metric");

        let nearby_query_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "nearby_query_latency_seconds",
            "Latency of radius queries against the location store",
        ))
        .expect("valid nearby_query_latency_seconds metric");

        let downstream_write_failures_total = IntCounterVec::new(
            Opts::new(
                "downstream_write_failures_total",
                "Writes that failed after the ledger committed, by store",
            ),
            &["store"],
        )
        .expect("valid downstream_write_failures_total metric");

        let reconciliation_repairs_total = IntCounterVec::new(
            Opts::new(
                "reconciliation_repairs_total",
                "Divergences repaired by reconciliation, by kind",
            ),
            &["kind"],
        )
        .expect("valid reconciliation_repairs_total metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(assignment_races_total.clone()))
            .expect("register assignment_races_total");
        registry
            .register(Box::new(dispatch_queue_depth.clone()))
            .expect("register dispatch_queue_depth");
        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(nearby_query_latency_seconds.clone()))
            .expect("register nearby_query_latency_seconds");
        registry
            .register(Box::new(downstream_write_failures_total.clone()))
            .expect("register downstream_write_failures_total");
        registry
            .register(Box::new(reconciliation_repairs_total.clone()))
            .expect("register reconciliation_repairs_total");

        Self {
            registry,
            assignments_total,
            assignment_latency_seconds,
            assignment_races_total,
            dispatch_queue_depth,
            location_updates_total,
            nearby_query_latency_seconds,
            downstream_write_failures_total,
            reconciliation_repairs_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

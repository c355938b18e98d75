use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};

/// Counters for one botpack process, rendered in the Prometheus text format.
pub struct BuildMetrics {
    registry: Registry,
    builds_total: Counter,
    build_failures_total: Counter,
    dependency_reuse_total: Counter,
    launches_total: Counter,
    nonzero_exits_total: Counter,
    build_duration_ms: Histogram,
}

impl BuildMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let builds_total = Counter::new("botpack_builds_total", "Total number of image builds")?;
        let build_failures_total = Counter::new(
            "botpack_build_failures_total",
            "Total number of failed image builds",
        )?;
        let dependency_reuse_total = Counter::new(
            "botpack_dependency_reuse_total",
            "Builds that reused an existing dependency layer",
        )?;
        let launches_total = Counter::new("botpack_launches_total", "Total number of bot launches")?;
        let nonzero_exits_total = Counter::new(
            "botpack_nonzero_exits_total",
            "Bot containers that exited with a non-zero code",
        )?;
        let build_duration_ms = Histogram::with_opts(
            HistogramOpts::new("botpack_build_duration_ms", "Image build duration in milliseconds")
                .buckets(vec![100.0, 500.0, 1_000.0, 5_000.0, 30_000.0, 120_000.0, 600_000.0]),
        )?;

        registry.register(Box::new(builds_total.clone()))?;
        registry.register(Box::new(build_failures_total.clone()))?;
        registry.register(Box::new(dependency_reuse_total.clone()))?;
        registry.register(Box::new(launches_total.clone()))?;
        registry.register(Box::new(nonzero_exits_total.clone()))?;
        registry.register(Box::new(build_duration_ms.clone()))?;

        Ok(Self {
            registry,
            builds_total,
            build_failures_total,
            dependency_reuse_total,
            launches_total,
            nonzero_exits_total,
            build_duration_ms,
        })
    }

    pub fn record_build(&self, dependency_reused: bool, duration_ms: u64) {
        self.builds_total.inc();
        if dependency_reused {
            self.dependency_reuse_total.inc();
        }
        self.build_duration_ms.observe(duration_ms as f64);
    }

    pub fn record_build_failure(&self) {
        self.builds_total.inc();
        self.build_failures_total.inc();
    }

    pub fn record_launch(&self) {
        self.launches_total.inc();
    }

    pub fn record_exit(&self, exit_code: i64) {
        if exit_code != 0 {
            self.nonzero_exits_total.inc();
        }
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

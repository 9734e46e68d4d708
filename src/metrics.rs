use crate::stats::{MemorySection, StatsRecord};
use prometheus::core::Collector;
use prometheus::{
    histogram_opts, opts, Counter, CounterVec, Encoder, Gauge, Histogram, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Self-metrics of the probe server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started: Instant,
    pub performstat_requests_total: CounterVec,
    pub performstat_section_unavailable_total: CounterVec,
    pub performstat_collect_duration_seconds: Histogram,
    pub performstat_scrape_count_total: Counter,
    pub performstat_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let performstat_requests_total = CounterVec::new(
            opts!(
                "performstat_requests_total",
                "Stats requests served, by surface"
            ),
            &["surface"],
        )?;
        let performstat_section_unavailable_total = CounterVec::new(
            opts!(
                "performstat_section_unavailable_total",
                "Stats sections reported as unavailable, by section"
            ),
            &["section"],
        )?;
        let performstat_collect_duration_seconds = Histogram::with_opts(histogram_opts!(
            "performstat_collect_duration_seconds",
            "Time spent assembling one stats response",
            vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
        ))?;
        let performstat_scrape_count_total = Counter::with_opts(opts!(
            "performstat_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let performstat_uptime_seconds = Gauge::with_opts(opts!(
            "performstat_uptime_seconds",
            "Probe server uptime in seconds"
        ))?;

        register(&registry, &performstat_requests_total)?;
        register(&registry, &performstat_section_unavailable_total)?;
        register(&registry, &performstat_collect_duration_seconds)?;
        register(&registry, &performstat_scrape_count_total)?;
        register(&registry, &performstat_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started: Instant::now(),
            performstat_requests_total,
            performstat_section_unavailable_total,
            performstat_collect_duration_seconds,
            performstat_scrape_count_total,
            performstat_uptime_seconds,
        }))
    }

    pub fn inc_request(&self, surface: &str) {
        self.performstat_requests_total
            .with_label_values(&[surface])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.performstat_scrape_count_total.inc();
    }

    pub fn observe_record(&self, record: &StatsRecord, elapsed: Duration) {
        self.performstat_collect_duration_seconds
            .observe(elapsed.as_secs_f64());
        if matches!(record.memory, MemorySection::Error { .. }) {
            self.inc_unavailable("memory");
        }
        if record.gpu.is_error() {
            self.inc_unavailable("gpu");
        }
    }

    fn inc_unavailable(&self, section: &str) {
        self.performstat_section_unavailable_total
            .with_label_values(&[section])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.performstat_uptime_seconds
            .set(self.started.elapsed().as_secs_f64());
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Crawl metrics collector, shared by the bus, the driver and the persistence workers
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    metrics: Arc<Mutex<Metrics>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the crawl counters
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    pub start_time: DateTime<Utc>,

    /// Tasks handed to the bus
    pub tasks_run: usize,

    pub successful_fetches: usize,

    pub fetch_failures: usize,

    /// Processors that returned an error or panicked
    pub processor_failures: usize,

    /// Tasks whose route had no processor
    pub skipped_routes: usize,

    /// Tasks that gave up waiting for a browser session
    pub pool_timeouts: usize,

    /// Pages rejected as near-duplicates
    pub duplicates: usize,

    pub persisted: usize,

    pub persist_failures: usize,

    pub bytes_downloaded: usize,

    /// Fetch durations per route in milliseconds
    pub fetch_durations: HashMap<String, Vec<u64>>,

    /// Tasks per route
    pub route_counts: HashMap<String, usize>,

    pub status_codes: HashMap<u16, usize>,

    /// Successful fetches per second since start
    pub current_rps: f64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Count a task routed to `route`
    pub async fn record_task(&self, route: &str) {
        let mut metrics = self.metrics.lock().await;
        metrics.tasks_run += 1;
        *metrics.route_counts.entry(route.to_string()).or_default() += 1;
    }

    /// Record a finished fetch
    pub async fn record_fetch(&self, route: &str, success: bool, duration_ms: u64, status_code: Option<u16>, bytes: usize) {
        let mut metrics = self.metrics.lock().await;

        if success {
            metrics.successful_fetches += 1;
        } else {
            metrics.fetch_failures += 1;
        }

        metrics.bytes_downloaded += bytes;

        metrics.fetch_durations
            .entry(route.to_string())
            .or_default()
            .push(duration_ms);

        if let Some(code) = status_code {
            *metrics.status_codes.entry(code).or_default() += 1;
        }

        let elapsed_seconds = (Utc::now() - metrics.start_time).num_seconds().max(1) as f64;
        metrics.current_rps = metrics.successful_fetches as f64 / elapsed_seconds;
    }

    pub async fn record_processor_failure(&self) {
        self.metrics.lock().await.processor_failures += 1;
    }

    pub async fn record_skipped_route(&self) {
        self.metrics.lock().await.skipped_routes += 1;
    }

    pub async fn record_pool_timeout(&self) {
        self.metrics.lock().await.pool_timeouts += 1;
    }

    pub async fn record_duplicate(&self) {
        self.metrics.lock().await.duplicates += 1;
    }

    /// Record the outcome of one persistence job
    pub async fn record_persisted(&self, success: bool) {
        let mut metrics = self.metrics.lock().await;
        if success {
            metrics.persisted += 1;
        } else {
            metrics.persist_failures += 1;
        }
    }

    /// Start timing a fetch
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }

    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }

    pub async fn reset(&self) {
        let mut metrics = self.metrics.lock().await;
        *metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };
    }
}

pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    /// Elapsed milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

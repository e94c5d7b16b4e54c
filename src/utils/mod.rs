pub mod logging;
pub mod metrics;

pub use logging::{init_logging, default_log_file};
pub use metrics::{MetricsCollector, Metrics, RequestTimer};

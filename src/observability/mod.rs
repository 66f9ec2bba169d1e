pub mod logging;
pub mod metrics;

pub use logging::{init_logging, mask_key, mask_sensitive, LogConfig, LogFormat};
pub use metrics::{describe_metrics, get_metrics, LatencyTimer, Metrics, METRICS};

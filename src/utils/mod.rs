pub mod error;
pub mod logger;
pub mod metrics;
pub mod status;
#[cfg(test)]
pub mod test_support;

pub use error::{P2PError, Result};
pub use logger::setup_logging;
pub use metrics::MetricsCollector;
pub use status::{LogSink, MemorySink, NullSink, StatusSink, StatusSnapshot};

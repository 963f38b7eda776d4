use log::{debug, info};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, sleep};

use crate::storage::LocalStore;
use crate::utils::{MetricsCollector, StatusSink};

/// Serves part transfers for the resources a client holds.
pub struct Uploader {
    store: Arc<RwLock<LocalStore>>,
    transfer_duration: Duration,
    sink: Arc<dyn StatusSink>,
    metrics: MetricsCollector,
}

impl Uploader {
    pub fn new(
        store: Arc<RwLock<LocalStore>>,
        transfer_duration: Duration,
        sink: Arc<dyn StatusSink>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            store,
            transfer_duration,
            sink,
            metrics,
        }
    }

    /// Returns `false` for an unknown resource or a part out of range,
    /// otherwise takes `transfer_duration` and returns `true`.
    pub async fn handle_transfer(&self, resource: &str, part: u32) -> bool {
        if !self.store.read().await.has_part(resource, part) {
            debug!("Declining part {} of {}: not held", part, resource);
            return false;
        }

        self.sink
            .append_log(&format!("Uploading {} part {}", resource, part));
        sleep(self.transfer_duration).await;

        self.metrics.record_transfer_served().await;
        info!("Uploaded {} part {}", resource, part);
        true
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct OverlayMetrics {
    pub lookups_served: u64,
    pub federated_queries: u64,
    pub clients_evicted: u64,
    pub servers_evicted: u64,
    pub transfers_served: u64,
    pub parts_downloaded: u64,
    pub parts_failed: u64,
    pub peers_evicted: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub uptime: Duration,
    pub start_time: Instant,
}

impl Default for OverlayMetrics {
    fn default() -> Self {
        Self {
            lookups_served: 0,
            federated_queries: 0,
            clients_evicted: 0,
            servers_evicted: 0,
            transfers_served: 0,
            parts_downloaded: 0,
            parts_failed: 0,
            peers_evicted: 0,
            runs_completed: 0,
            runs_failed: 0,
            uptime: Duration::new(0, 0),
            start_time: Instant::now(),
        }
    }
}

/// Shared counters for one node. Cloning shares the same counters.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<OverlayMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_lookup_served(&self) {
        self.metrics.write().await.lookups_served += 1;
    }

    pub async fn record_federated_query(&self) {
        self.metrics.write().await.federated_queries += 1;
    }

    pub async fn record_client_evicted(&self) {
        self.metrics.write().await.clients_evicted += 1;
    }

    pub async fn record_server_evicted(&self) {
        self.metrics.write().await.servers_evicted += 1;
    }

    pub async fn record_transfer_served(&self) {
        self.metrics.write().await.transfers_served += 1;
    }

    pub async fn record_part_downloaded(&self) {
        self.metrics.write().await.parts_downloaded += 1;
    }

    pub async fn record_part_failed(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.parts_failed += 1;
        metrics.peers_evicted += 1;
    }

    pub async fn record_run_completed(&self) {
        self.metrics.write().await.runs_completed += 1;
    }

    pub async fn record_run_failed(&self) {
        self.metrics.write().await.runs_failed += 1;
    }

    pub async fn get_metrics(&self) -> OverlayMetrics {
        let mut metrics = self.metrics.read().await.clone();
        metrics.uptime = metrics.start_time.elapsed();
        metrics
    }

    pub async fn print_stats(&self) {
        let metrics = self.get_metrics().await;

        println!("\n=== Overlay Statistics ===");
        println!("Uptime: {:.2?}", metrics.uptime);
        println!(
            "Lookups: {} served, {} federated queries",
            metrics.lookups_served, metrics.federated_queries
        );
        println!(
            "Evictions: {} clients, {} servers, {} download peers",
            metrics.clients_evicted, metrics.servers_evicted, metrics.peers_evicted
        );
        println!(
            "Parts: {} downloaded, {} failed, {} served",
            metrics.parts_downloaded, metrics.parts_failed, metrics.transfers_served
        );
        println!(
            "Runs: {} completed, {} failed",
            metrics.runs_completed, metrics.runs_failed
        );
        println!("==========================\n");
    }
}

//! Sibling-server tracking.
//!
//! Every server runs one [`FederationDaemon`]. It periodically lists the
//! servers registered in the directory, asks each one for its name and keeps
//! the ones that answer in the shared [`FederationSet`]. Discovery removes a
//! sibling from the same set as soon as a federated query to it fails; the
//! daemon brings it back once it answers again.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

use crate::core::config::SERVER_NAMESPACE;
use crate::core::{Connector, PeerIdentity, ServerHandle};
use crate::network::directory::{Directory, qualified_name};
use crate::utils::{MetricsCollector, Result, StatusSink};

#[derive(Clone)]
pub struct FederationEntry {
    pub identity: PeerIdentity,
    /// Directory name the sibling was found under.
    pub name: String,
    pub handle: Arc<dyn ServerHandle>,
}

/// Sibling servers believed to be live and queryable.
#[derive(Default)]
pub struct FederationSet {
    entries: Vec<FederationEntry>,
}

impl FederationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or refreshes a sibling; returns true if it is new.
    pub fn upsert(&mut self, entry: FederationEntry) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.name == entry.name) {
            *existing = entry;
            return false;
        }
        // The same server may be listed under a fresh name after a restart.
        self.entries.retain(|e| e.identity != entry.identity);
        info!("Federated with server {} ({})", entry.name, entry.identity);
        self.entries.push(entry);
        true
    }

    pub fn remove_by_name(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        before != self.entries.len()
    }

    pub fn remove(&mut self, identity: &PeerIdentity) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.identity != identity);
        before != self.entries.len()
    }

    pub fn snapshot(&self) -> Vec<FederationEntry> {
        self.entries.clone()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.name.clone()).collect();
        names.sort();
        names
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct FederationDaemon {
    own_name: String,
    own_identity: PeerIdentity,
    interval: Duration,
    directory: Arc<dyn Directory>,
    connector: Arc<dyn Connector>,
    federation: Arc<Mutex<FederationSet>>,
    sink: Arc<dyn StatusSink>,
    metrics: MetricsCollector,
}

impl FederationDaemon {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        own_name: String,
        own_endpoint: &str,
        interval: Duration,
        directory: Arc<dyn Directory>,
        connector: Arc<dyn Connector>,
        federation: Arc<Mutex<FederationSet>>,
        sink: Arc<dyn StatusSink>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            own_name,
            own_identity: PeerIdentity::from_endpoint(own_endpoint),
            interval,
            directory,
            connector,
            federation,
            sink,
            metrics,
        }
    }

    /// Runs [`refresh_once`](Self::refresh_once) every interval until
    /// `shutdown` flips to `true`.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Federation daemon started for {}", self.own_name);
            loop {
                if let Err(e) = self.refresh_once().await {
                    warn!("Federation refresh skipped: {}", e);
                }

                tokio::select! {
                    _ = sleep(self.interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Federation daemon stopped for {}", self.own_name);
        })
    }

    /// One pass over the directory. Fails only if the directory cannot be
    /// listed; unreachable siblings are dropped silently.
    pub async fn refresh_once(&self) -> Result<()> {
        let names = match self.directory.list_names(SERVER_NAMESPACE).await {
            Ok(names) => names,
            Err(e) => {
                self.sink
                    .append_log(&format!("Cannot list servers in the directory: {}", e));
                return Err(e);
            }
        };

        for name in names.iter().filter(|n| **n != self.own_name) {
            match self.check_sibling(name).await {
                Ok(Some(entry)) => {
                    if self.federation.lock().await.upsert(entry) {
                        self.sink.append_log(&format!("Server {} joined", name));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("Server {} unavailable: {}", name, e);
                    if self.federation.lock().await.remove_by_name(name) {
                        self.metrics.record_server_evicted().await;
                        self.sink.append_log(&format!("Server {} left", name));
                    }
                }
            }
        }

        let known = self.federation.lock().await.names();
        self.sink.set_server_list(known);
        Ok(())
    }

    /// Resolves and pings a sibling. `Ok(None)` when the name turns out to
    /// point back at this server.
    async fn check_sibling(&self, name: &str) -> Result<Option<FederationEntry>> {
        let endpoint = self
            .directory
            .resolve(&qualified_name(SERVER_NAMESPACE, name))
            .await?;
        let identity = PeerIdentity::from_endpoint(&endpoint);
        if identity == self.own_identity {
            return Ok(None);
        }

        let handle = self.connector.server(&endpoint);
        let reported = handle.identity_name().await?;
        if reported == self.own_name {
            return Ok(None);
        }

        Ok(Some(FederationEntry {
            identity,
            name: name.to_string(),
            handle,
        }))
    }
}

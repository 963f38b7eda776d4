use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::core::{ClientHandle, PeerIdentity, PeerRef, ResourceDescriptor};
use crate::network::FederationSet;
use crate::storage::ResourceIndex;
use crate::utils::{MetricsCollector, Result, StatusSink};

/// Answers "who holds this resource" for one server.
///
/// Neither lock is held across an RPC: records are copied out and pinged
/// concurrently, and evictions applied afterwards.
pub struct Discovery {
    index: Arc<Mutex<ResourceIndex>>,
    federation: Arc<Mutex<FederationSet>>,
    sibling_timeout: Duration,
    sink: Arc<dyn StatusSink>,
    metrics: MetricsCollector,
}

impl Discovery {
    pub fn new(
        index: Arc<Mutex<ResourceIndex>>,
        federation: Arc<Mutex<FederationSet>>,
        sibling_timeout: Duration,
        sink: Arc<dyn StatusSink>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            index,
            federation,
            sibling_timeout,
            sink,
            metrics,
        }
    }

    pub async fn register(
        &self,
        peer: PeerRef,
        handle: Arc<dyn ClientHandle>,
        resources: Vec<ResourceDescriptor>,
    ) {
        let name = peer.name.clone();
        let names = {
            let mut index = self.index.lock().await;
            index.upsert(peer, handle, resources);
            index.client_names()
        };
        self.sink.append_log(&format!("{} connected", name));
        self.sink.set_client_list(names);
    }

    pub async fn unregister(&self, identity: &PeerIdentity) -> bool {
        let (removed, names) = {
            let mut index = self.index.lock().await;
            let removed = index.remove(identity);
            (removed, index.client_names())
        };

        match removed {
            Some(record) => {
                self.sink
                    .append_log(&format!("{} disconnected", record.peer.name));
                self.sink.set_client_list(names);
                true
            }
            None => false,
        }
    }

    /// Re-reads the client's advertised resources and overwrites its record,
    /// registering the client if this server did not know it yet.
    pub async fn refresh_resources(
        &self,
        peer: PeerRef,
        handle: Arc<dyn ClientHandle>,
    ) -> Result<()> {
        let resources = handle.resource_list().await?;
        debug!("{} now advertises {} resources", peer, resources.len());

        let mut index = self.index.lock().await;
        if !index.update_resources(&peer.identity(), resources.clone()) {
            index.upsert(peer, handle, resources);
            let names = index.client_names();
            drop(index);
            self.sink.set_client_list(names);
        }
        Ok(())
    }

    /// Live local clients advertising `query`, in registration order.
    pub async fn local_lookup(&self, query: &ResourceDescriptor) -> Vec<PeerRef> {
        let records = self.index.lock().await.snapshot();

        let mut pings = JoinSet::new();
        for (pos, record) in records.into_iter().enumerate() {
            pings.spawn(async move {
                let alive = matches!(record.handle.ping().await, Ok(true));
                (pos, record, alive)
            });
        }

        let mut answered = Vec::new();
        while let Some(joined) = pings.join_next().await {
            match joined {
                Ok(answer) => answered.push(answer),
                Err(e) => warn!("Client ping task failed: {}", e),
            }
        }
        answered.sort_by_key(|(pos, _, _)| *pos);

        let mut matches = Vec::new();
        let mut dead = Vec::new();
        for (_, record, alive) in answered {
            if !alive {
                dead.push((record.peer, record.handle));
            } else if record.advertises(query) {
                matches.push(record.peer);
            }
        }

        if !dead.is_empty() {
            self.evict_clients(dead).await;
        }
        matches
    }

    /// Matches reported by sibling servers, queried concurrently. A sibling
    /// that fails or stays silent past the sibling timeout is dropped from the
    /// federation until the daemon finds it again.
    pub async fn federated_lookup(&self, query: &ResourceDescriptor) -> Vec<PeerRef> {
        let siblings = self.federation.lock().await.snapshot();

        let mut queries = JoinSet::new();
        for (pos, sibling) in siblings.into_iter().enumerate() {
            self.metrics.record_federated_query().await;
            let query = query.clone();
            let bound = self.sibling_timeout;
            queries.spawn(async move {
                let asked = sibling.handle.local_lookup_resource(&query);
                let answer = match timeout(bound, asked).await {
                    Ok(answer) => answer.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("no answer within {:?}", bound)),
                };
                (pos, sibling, answer)
            });
        }

        let mut answered = Vec::new();
        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok(answer) => answered.push(answer),
                Err(e) => warn!("Sibling query task failed: {}", e),
            }
        }
        answered.sort_by_key(|(pos, _, _)| *pos);

        let mut matches = Vec::new();
        for (_, sibling, answer) in answered {
            match answer {
                Ok(found) => {
                    debug!("Server {} reported {} holders of {}", sibling.name, found.len(), query);
                    matches.extend(found);
                }
                Err(e) => {
                    warn!("Server {} does not respond: {}", sibling.name, e);
                    if self.federation.lock().await.remove(&sibling.identity) {
                        self.metrics.record_server_evicted().await;
                        self.sink
                            .append_log(&format!("Server {} does not respond", sibling.name));
                    }
                }
            }
        }
        matches
    }

    /// Local and federated holders of `query`, each peer at most once.
    /// An empty result means nobody holds it.
    pub async fn lookup(&self, query: &ResourceDescriptor) -> Vec<PeerRef> {
        self.metrics.record_lookup_served().await;

        let (local, remote) = tokio::join!(self.local_lookup(query), self.federated_lookup(query));

        let peers = dedup_peers(local.into_iter().chain(remote));
        info!("Lookup for {} found {} peers", query, peers.len());
        peers
    }

    pub async fn client_count(&self) -> usize {
        self.index.lock().await.len()
    }

    /// Removes clients whose ping failed, unless the record was replaced by a
    /// re-registration while the ping was in flight.
    async fn evict_clients(&self, dead: Vec<(PeerRef, Arc<dyn ClientHandle>)>) {
        let (evicted, names) = {
            let mut index = self.index.lock().await;
            let mut evicted = Vec::new();
            for (peer, pinged) in dead {
                let identity = peer.identity();
                let unchanged = index
                    .get(&identity)
                    .is_some_and(|record| Arc::ptr_eq(&record.handle, &pinged));
                if unchanged {
                    index.remove(&identity);
                    evicted.push(peer);
                } else {
                    debug!("{} re-registered during the ping, keeping it", peer);
                }
            }
            (evicted, index.client_names())
        };

        if evicted.is_empty() {
            return;
        }
        for peer in evicted {
            self.metrics.record_client_evicted().await;
            self.sink
                .append_log(&format!("Client {} does not respond", peer.name));
        }
        self.sink.set_client_list(names);
    }
}

/// Keeps the first occurrence of every identity.
pub fn dedup_peers(peers: impl IntoIterator<Item = PeerRef>) -> Vec<PeerRef> {
    let mut seen = HashSet::new();
    peers
        .into_iter()
        .filter(|peer| seen.insert(peer.identity()))
        .collect()
}

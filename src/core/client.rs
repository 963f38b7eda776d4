use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;

use crate::core::config::{CLIENT_NAMESPACE, SERVER_NAMESPACE};
use crate::core::{
    ClientConfig, ClientHandle, Connector, PeerIdentity, PeerRef, Request, ResourceDescriptor, Response,
    ServerHandle,
};
use crate::network::directory::qualified_name;
use crate::network::{Directory, RpcHandler, RpcListener};
use crate::storage::LocalStore;
use crate::transfer::{Downloader, RunReport, Uploader};
use crate::utils::{MetricsCollector, P2PError, Result, StatusSink};

/// How a search ended when nothing went wrong.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// Every part was fetched and the resource is now held locally.
    Downloaded(RunReport),
    /// No peer in the overlay holds the resource.
    NotFound,
}

struct BoundServer {
    name: String,
    endpoint: String,
    handle: Arc<dyn ServerHandle>,
}

/// Clears the in-progress flag when a search ends, however it ends.
struct DownloadGuard<'a>(&'a AtomicBool);

impl Drop for DownloadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A client: holds resources, serves their parts to other peers and
/// downloads new ones found through its server.
pub struct ClientNode {
    config: ClientConfig,
    me: PeerRef,
    directory: Arc<dyn Directory>,
    connector: Arc<dyn Connector>,
    store: Arc<RwLock<LocalStore>>,
    uploader: Uploader,
    downloader: Downloader,
    server: Mutex<Option<BoundServer>>,
    downloading: AtomicBool,
    sink: Arc<dyn StatusSink>,
    metrics: MetricsCollector,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientNode {
    /// Binds the peer RPC listener, registers `Client/<name>`, then joins the
    /// configured server or, if that fails, any server in the directory.
    /// Staying unconnected is not fatal: the next search connects again.
    pub async fn start(
        config: ClientConfig,
        directory: Arc<dyn Directory>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn StatusSink>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let listener = RpcListener::bind(&config.listen_addr).await?;
        let me = PeerRef::new(config.name.clone(), listener.endpoint());
        let metrics = MetricsCollector::new();
        let store = Arc::new(RwLock::new(LocalStore::new(config.resources.clone())));
        let uploader = Uploader::new(
            store.clone(),
            config.transfer_duration,
            sink.clone(),
            metrics.clone(),
        );
        let downloader = Downloader::new(
            config.download_capacity,
            config.transfer_timeout,
            sink.clone(),
            metrics.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let node = Arc::new(Self {
            config,
            me,
            directory,
            connector,
            store,
            uploader,
            downloader,
            server: Mutex::new(None),
            downloading: AtomicBool::new(false),
            sink,
            metrics,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let listener_task = listener.serve(node.clone(), shutdown_rx);
        node.tasks.lock().await.push(listener_task);
        if let Err(e) = node
            .directory
            .register(&qualified_name(CLIENT_NAMESPACE, &node.me.name), &node.me.endpoint)
            .await
        {
            warn!("Could not register {} in the directory: {}", node.me.name, e);
        }
        node.sink.set_local_resources(node.resources().await);
        info!("Client {} serving peers at {}", node.me.name, node.me.endpoint);

        let preferred = node.config.server_name.clone();
        if let Err(e) = node.connect(preferred.as_deref()).await {
            warn!("Client {} starts unconnected: {}", node.me.name, e);
        }
        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.me.name
    }

    /// This client as other peers see it.
    pub fn peer_ref(&self) -> &PeerRef {
        &self.me
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub async fn resources(&self) -> Vec<ResourceDescriptor> {
        self.store.read().await.list()
    }

    pub async fn server_name(&self) -> Option<String> {
        self.server.lock().await.as_ref().map(|s| s.name.clone())
    }

    pub async fn is_connected(&self) -> bool {
        self.server.lock().await.is_some()
    }

    pub fn is_downloading(&self) -> bool {
        self.downloading.load(Ordering::SeqCst)
    }

    /// Joins `preferred` if given and reachable, otherwise the first server
    /// in the directory listing that accepts the registration.
    pub async fn connect(&self, preferred: Option<&str>) -> Result<String> {
        if let Some(name) = preferred {
            match self.try_server(name).await {
                Ok((endpoint, handle)) => {
                    self.bind(name, endpoint, handle).await;
                    return Ok(name.to_string());
                }
                Err(e) => {
                    warn!("Server {} unavailable: {}", name, e);
                    self.sink
                        .append_log(&format!("Server {} does not respond", name));
                }
            }
        }
        self.connect_by_scan().await.map(|(name, _)| name)
    }

    /// Unregisters from the bound server. The client counts as disconnected
    /// afterwards even if the server could not be told.
    pub async fn disconnect(&self) {
        let Some(bound) = self.server.lock().await.take() else {
            return;
        };
        match bound.handle.unregister_client(&self.me).await {
            Ok(()) => info!("{} disconnected from {}", self.me.name, bound.name),
            Err(e) => warn!("Could not unregister from {}: {}", bound.name, e),
        }
        self.sink
            .append_log(&format!("Disconnected from server {}", bound.name));
    }

    /// Parses `"<name> <parts>"`, finds the holders and downloads the resource.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome> {
        let resource = match ResourceDescriptor::parse_query(query) {
            Ok(resource) => resource,
            Err(e) => {
                self.sink.append_log(&format!("Invalid query {:?}", query));
                return Err(e);
            }
        };
        self.search_resource(&resource).await
    }

    pub async fn search_resource(&self, resource: &ResourceDescriptor) -> Result<SearchOutcome> {
        if self
            .downloading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.sink.append_log("A download is already in progress");
            return Err(P2PError::DownloadInProgress);
        }
        let _guard = DownloadGuard(&self.downloading);

        if self.store.read().await.holds(resource) {
            self.sink
                .append_log(&format!("Resource {} is already held", resource));
            return Err(P2PError::AlreadyHeld(resource.to_string()));
        }

        self.sink.append_log(&format!("Searching for {}", resource));
        let peers = self.lookup(resource).await?;
        if peers.is_empty() {
            info!("No peer holds {}", resource);
            self.sink.append_log(&format!("Resource {} not found", resource));
            return Ok(SearchOutcome::NotFound);
        }

        let candidates: Vec<(PeerRef, Arc<dyn ClientHandle>)> = peers
            .into_iter()
            .map(|peer| {
                let handle = self.connector.client(&peer);
                (peer, handle)
            })
            .collect();

        let report = self.downloader.run(resource, candidates).await?;
        self.finish_download(resource).await;
        Ok(SearchOutcome::Downloaded(report))
    }

    /// Disconnects, then stops the peer listener.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Client task ended abnormally: {}", e);
            }
        }
        info!("Client {} stopped", self.me.name);
    }

    /// Asks the bound server; when it does not answer, reconnects by scan
    /// and asks once more. If no other server takes the client it ends up
    /// disconnected.
    async fn lookup(&self, resource: &ResourceDescriptor) -> Result<Vec<PeerRef>> {
        let bound = {
            let server = self.server.lock().await;
            server.as_ref().map(|s| (s.name.clone(), s.handle.clone()))
        };
        let (name, handle) = match bound {
            Some(bound) => bound,
            None => self.connect_by_scan().await?,
        };

        match handle.lookup_resource(resource).await {
            Ok(peers) => Ok(peers),
            Err(e) if e.is_unreachable() => {
                warn!("Lookup on {} failed: {}", name, e);
                self.sink.append_log(&format!(
                    "Server {} does not respond, looking for another one",
                    name
                ));
                let handle = match self.connect_by_scan().await {
                    Ok((_, handle)) => handle,
                    Err(e) => {
                        self.disconnect().await;
                        return Err(e);
                    }
                };
                handle.lookup_resource(resource).await
            }
            Err(e) => Err(e),
        }
    }

    async fn connect_by_scan(&self) -> Result<(String, Arc<dyn ServerHandle>)> {
        let names = match self.directory.list_names(SERVER_NAMESPACE).await {
            Ok(names) => names,
            Err(e) => {
                warn!("Cannot list servers: {}", e);
                self.sink.append_log("Directory does not respond");
                return Err(P2PError::NoServerAvailable);
            }
        };

        for name in names {
            match self.try_server(&name).await {
                Ok((endpoint, handle)) => {
                    self.bind(&name, endpoint, handle.clone()).await;
                    return Ok((name, handle));
                }
                Err(e) => warn!("Server {} refused {}: {}", name, self.me.name, e),
            }
        }

        self.sink.append_log("No server available");
        Err(P2PError::NoServerAvailable)
    }

    async fn try_server(&self, name: &str) -> Result<(String, Arc<dyn ServerHandle>)> {
        let endpoint = self
            .directory
            .resolve(&qualified_name(SERVER_NAMESPACE, name))
            .await?;
        let handle = self.connector.server(&endpoint);
        handle.register_client(&self.me).await?;
        Ok((endpoint, handle))
    }

    /// Makes `handle` the bound server. A previous binding to another server
    /// is unregistered there so the client is indexed by one server only.
    async fn bind(&self, name: &str, endpoint: String, handle: Arc<dyn ServerHandle>) {
        let identity = PeerIdentity::from_endpoint(&endpoint);
        let previous = self.server.lock().await.replace(BoundServer {
            name: name.to_string(),
            endpoint,
            handle,
        });
        info!("{} connected to server {}", self.me.name, name);
        self.sink
            .append_log(&format!("Connected to server {}", name));

        let Some(old) = previous else {
            return;
        };
        if PeerIdentity::from_endpoint(&old.endpoint) == identity {
            return;
        }
        match old.handle.unregister_client(&self.me).await {
            Ok(()) => info!("{} left server {}", self.me.name, old.name),
            Err(e) => {
                warn!("Could not unregister from {}: {}", old.name, e);
                self.sink
                    .append_log(&format!("Server {} does not respond", old.name));
            }
        }
    }

    async fn finish_download(&self, resource: &ResourceDescriptor) {
        let resources = {
            let mut store = self.store.write().await;
            store.add(resource.clone());
            store.list()
        };
        self.sink.set_local_resources(resources);
        self.sink
            .append_log(&format!("Download of {} complete", resource));

        let server = {
            let bound = self.server.lock().await;
            bound.as_ref().map(|s| (s.name.clone(), s.handle.clone()))
        };
        match server {
            Some((name, handle)) => {
                if let Err(e) = handle.notify_resources_changed(&self.me).await {
                    warn!("Could not tell {} about {}: {}", name, resource, e);
                    self.sink
                        .append_log(&format!("Server {} does not respond", name));
                }
            }
            None => {
                warn!("{} holds {} but has no server to tell", self.me.name, resource);
                self.sink.append_log(&format!(
                    "Resource {} not announced: no server connected",
                    resource
                ));
            }
        }
    }
}

#[async_trait]
impl RpcHandler for ClientNode {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong(true),
            Request::GetIdentityName => Response::Name(self.me.name.clone()),
            Request::GetResourceList => Response::Resources(self.resources().await),
            Request::RequestTransfer { resource, part } => {
                Response::Transfer(self.uploader.handle_transfer(&resource, part).await)
            }
            other => Response::unsupported(&other),
        }
    }
}

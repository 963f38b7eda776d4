use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::core::config::SERVER_NAMESPACE;
use crate::core::{Connector, PeerRef, Request, Response, ServerConfig};
use crate::network::directory::qualified_name;
use crate::network::{
    Directory, Discovery, FederationDaemon, FederationSet, RpcHandler, RpcListener,
};
use crate::storage::ResourceIndex;
use crate::utils::{MetricsCollector, Result, StatusSink};

/// A discovery server: indexes its own clients and federates with the other
/// servers registered in the directory.
pub struct ServerNode {
    config: ServerConfig,
    endpoint: String,
    connector: Arc<dyn Connector>,
    discovery: Arc<Discovery>,
    federation: Arc<Mutex<FederationSet>>,
    sink: Arc<dyn StatusSink>,
    metrics: MetricsCollector,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServerNode {
    /// Binds the RPC listener, registers `Server/<name>` in the directory and
    /// starts the federation daemon.
    pub async fn start(
        config: ServerConfig,
        directory: Arc<dyn Directory>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn StatusSink>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let listener = RpcListener::bind(&config.listen_addr).await?;
        let endpoint = listener.endpoint();
        let metrics = MetricsCollector::new();
        let federation = Arc::new(Mutex::new(FederationSet::new()));
        let discovery = Arc::new(Discovery::new(
            Arc::new(Mutex::new(ResourceIndex::new())),
            federation.clone(),
            config.federation_timeout,
            sink.clone(),
            metrics.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let node = Arc::new(Self {
            config,
            endpoint,
            connector: connector.clone(),
            discovery,
            federation: federation.clone(),
            sink: sink.clone(),
            metrics: metrics.clone(),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let listener_task = listener.serve(node.clone(), shutdown_rx.clone());

        if let Err(e) = directory
            .register(&qualified_name(SERVER_NAMESPACE, &node.config.name), &node.endpoint)
            .await
        {
            let _ = node.shutdown_tx.send(true);
            return Err(e);
        }

        let daemon = Arc::new(FederationDaemon::new(
            node.config.name.clone(),
            &node.endpoint,
            node.config.federation_interval,
            directory,
            connector,
            federation,
            sink,
            metrics,
        ));
        let daemon_task = daemon.spawn(shutdown_rx);

        node.tasks.lock().await.extend([listener_task, daemon_task]);
        info!("Server {} started at {}", node.config.name, node.endpoint);
        node.sink
            .append_log(&format!("Server {} ready at {}", node.config.name, node.endpoint));
        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Names of the sibling servers currently federated with this one.
    pub async fn siblings(&self) -> Vec<String> {
        self.federation.lock().await.names()
    }

    /// Stops the listener and the federation daemon and waits for both.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Server task ended abnormally: {}", e);
            }
        }
        info!("Server {} stopped", self.config.name);
    }

    async fn register_client(&self, client: PeerRef) -> Result<Response> {
        let handle = self.connector.client(&client);
        let resources = handle.resource_list().await?;
        debug!("{} registers with {} resources", client, resources.len());
        self.discovery.register(client, handle, resources).await;
        Ok(Response::Ack)
    }

    async fn resources_changed(&self, client: PeerRef) -> Result<Response> {
        let handle = self.connector.client(&client);
        self.discovery.refresh_resources(client, handle).await?;
        Ok(Response::Ack)
    }
}

#[async_trait]
impl RpcHandler for ServerNode {
    async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Ping => Ok(Response::Pong(true)),
            Request::GetIdentityName => Ok(Response::Name(self.config.name.clone())),
            Request::RegisterClient { client } => self.register_client(client).await,
            Request::UnregisterClient { client } => {
                self.discovery.unregister(&client.identity()).await;
                Ok(Response::Ack)
            }
            Request::LookupResource { resource } => {
                Ok(Response::Peers(self.discovery.lookup(&resource).await))
            }
            Request::LocalLookupResource { resource } => {
                Ok(Response::Peers(self.discovery.local_lookup(&resource).await))
            }
            Request::NotifyResourcesChanged { client } => self.resources_changed(client).await,
            other => return Response::unsupported(&other),
        };

        result.unwrap_or_else(|e| {
            warn!("Request failed on server {}: {}", self.config.name, e);
            Response::Error(e.to_string())
        })
    }
}

//! Name registry shared by every node of an overlay.
//!
//! Names are `<namespace>/<node>`; servers live under
//! [`SERVER_NAMESPACE`](crate::core::config::SERVER_NAMESPACE). The protocol
//! only consumes the [`Directory`] trait. [`MemoryDirectory`] serves a single
//! process, [`DirectoryService`] exposes one over TCP and [`RemoteDirectory`]
//! talks to it.

use async_trait::async_trait;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

use crate::core::protocol::unexpected;
use crate::core::{Request, Response};
use crate::network::{RpcHandler, RpcListener, Transport};
use crate::utils::{P2PError, Result};

#[async_trait]
pub trait Directory: Send + Sync {
    /// Binds `name` to `endpoint`, replacing any previous binding.
    async fn register(&self, name: &str, endpoint: &str) -> Result<()>;
    /// Node names registered under `namespace`, without the prefix, sorted.
    async fn list_names(&self, namespace: &str) -> Result<Vec<String>>;
    /// Fails with [`P2PError::NotBound`] when nothing is registered.
    async fn resolve(&self, name: &str) -> Result<String>;
}

pub fn qualified_name(namespace: &str, node: &str) -> String {
    format!("{}/{}", namespace, node)
}

#[derive(Default, Clone)]
pub struct MemoryDirectory {
    bindings: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops a binding, as when a registry entry expires.
    pub async fn unbind(&self, name: &str) -> bool {
        self.bindings.write().await.remove(name).is_some()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn register(&self, name: &str, endpoint: &str) -> Result<()> {
        if name.split_once('/').map_or(true, |(ns, node)| ns.is_empty() || node.is_empty()) {
            return Err(P2PError::ConfigError(format!(
                "directory name {:?} must be <namespace>/<node>",
                name
            )));
        }
        self.bindings
            .write()
            .await
            .insert(name.to_string(), endpoint.to_string());
        debug!("Bound {} -> {}", name, endpoint);
        Ok(())
    }

    async fn list_names(&self, namespace: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", namespace);
        Ok(self
            .bindings
            .read()
            .await
            .keys()
            .filter_map(|name| name.strip_prefix(&prefix))
            .map(str::to_string)
            .collect())
    }

    async fn resolve(&self, name: &str) -> Result<String> {
        self.bindings
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| P2PError::NotBound(name.to_string()))
    }
}

/// Serves a [`MemoryDirectory`] to other processes.
pub struct DirectoryService {
    directory: MemoryDirectory,
}

impl DirectoryService {
    pub fn new(directory: MemoryDirectory) -> Self {
        Self { directory }
    }

    /// Binds `listen_addr` and serves until `shutdown` flips. Returns the
    /// bound endpoint and the accept loop task.
    pub async fn start(
        self,
        listen_addr: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(String, JoinHandle<()>)> {
        let listener = RpcListener::bind(listen_addr).await?;
        let endpoint = listener.endpoint();
        info!("Directory service available at {}", endpoint);
        let task = listener.serve(Arc::new(self), shutdown);
        Ok((endpoint, task))
    }
}

#[async_trait]
impl RpcHandler for DirectoryService {
    async fn handle(&self, request: Request) -> Response {
        let result = match &request {
            Request::DirectoryRegister { name, endpoint } => self
                .directory
                .register(name, endpoint)
                .await
                .map(|_| Response::Ack),
            Request::DirectoryList { namespace } => {
                self.directory.list_names(namespace).await.map(Response::Names)
            }
            Request::DirectoryResolve { name } => {
                self.directory.resolve(name).await.map(Response::Endpoint)
            }
            Request::Ping => Ok(Response::Pong(true)),
            other => return Response::unsupported(other),
        };

        match result {
            Ok(response) => response,
            Err(P2PError::NotBound(name)) => Response::NotBound(name),
            Err(e) => Response::Error(e.to_string()),
        }
    }
}

/// Client side of [`DirectoryService`].
#[derive(Debug, Clone)]
pub struct RemoteDirectory {
    endpoint: String,
    timeout: Duration,
}

impl RemoteDirectory {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    async fn call(&self, request: Request) -> Result<Response> {
        Transport::call(&self.endpoint, request, self.timeout).await
    }
}

#[async_trait]
impl Directory for RemoteDirectory {
    async fn register(&self, name: &str, endpoint: &str) -> Result<()> {
        let request = Request::DirectoryRegister {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
        };
        match self.call(request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected("ack", other)),
        }
    }

    async fn list_names(&self, namespace: &str) -> Result<Vec<String>> {
        let request = Request::DirectoryList {
            namespace: namespace.to_string(),
        };
        match self.call(request).await? {
            Response::Names(names) => Ok(names),
            other => Err(unexpected("names", other)),
        }
    }

    async fn resolve(&self, name: &str) -> Result<String> {
        let request = Request::DirectoryResolve {
            name: name.to_string(),
        };
        match self.call(request).await? {
            Response::Endpoint(endpoint) => Ok(endpoint),
            other => Err(unexpected("endpoint", other)),
        }
    }
}

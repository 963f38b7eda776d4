use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::core::protocol::unexpected;
use crate::core::{PeerRef, Request, ResourceDescriptor, Response};
use crate::network::Transport;
use crate::utils::Result;

/// Calls a node can make on a client peer.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    async fn ping(&self) -> Result<bool>;
    async fn identity_name(&self) -> Result<String>;
    async fn resource_list(&self) -> Result<Vec<ResourceDescriptor>>;
    /// Transfers one part. `Ok(false)` means the peer declined or was interrupted.
    async fn request_transfer(&self, resource: &str, part: u32) -> Result<bool>;
}

/// Calls a node can make on a server.
#[async_trait]
pub trait ServerHandle: Send + Sync {
    async fn register_client(&self, client: &PeerRef) -> Result<()>;
    async fn unregister_client(&self, client: &PeerRef) -> Result<()>;
    /// Local and federated matches, deduplicated. Empty when nobody holds it.
    async fn lookup_resource(&self, resource: &ResourceDescriptor) -> Result<Vec<PeerRef>>;
    /// Matches among the server's own clients only.
    async fn local_lookup_resource(&self, resource: &ResourceDescriptor) -> Result<Vec<PeerRef>>;
    async fn identity_name(&self) -> Result<String>;
    async fn notify_resources_changed(&self, client: &PeerRef) -> Result<()>;
}

/// Turns endpoints into handles. Nodes never open connections themselves, so
/// the whole protocol can be driven over any transport.
pub trait Connector: Send + Sync {
    fn client(&self, peer: &PeerRef) -> Arc<dyn ClientHandle>;
    fn server(&self, endpoint: &str) -> Arc<dyn ServerHandle>;
}

/// Opens one TCP connection per call.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    rpc_timeout: Duration,
    lookup_timeout: Duration,
    transfer_timeout: Option<Duration>,
}

impl TcpConnector {
    /// A lookup fans out to the server's clients and siblings, so it is
    /// bounded by three RPC timeouts instead of one.
    pub fn new(rpc_timeout: Duration) -> Self {
        Self {
            rpc_timeout,
            lookup_timeout: rpc_timeout * 3,
            transfer_timeout: None,
        }
    }

    /// Part transfers take far longer than control calls and get their own bound.
    pub fn with_transfer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transfer_timeout = timeout;
        self
    }
}

impl Connector for TcpConnector {
    fn client(&self, peer: &PeerRef) -> Arc<dyn ClientHandle> {
        Arc::new(RemoteClient {
            endpoint: peer.endpoint.clone(),
            rpc_timeout: self.rpc_timeout,
            // Without an explicit bound a transfer may take as long as the peer needs.
            transfer_timeout: self.transfer_timeout.unwrap_or(Duration::from_secs(24 * 3600)),
        })
    }

    fn server(&self, endpoint: &str) -> Arc<dyn ServerHandle> {
        Arc::new(RemoteServer {
            endpoint: endpoint.to_string(),
            rpc_timeout: self.rpc_timeout,
            lookup_timeout: self.lookup_timeout,
        })
    }
}

pub struct RemoteClient {
    endpoint: String,
    rpc_timeout: Duration,
    transfer_timeout: Duration,
}

impl RemoteClient {
    async fn call(&self, request: Request) -> Result<Response> {
        Transport::call(&self.endpoint, request, self.rpc_timeout).await
    }
}

#[async_trait]
impl ClientHandle for RemoteClient {
    async fn ping(&self) -> Result<bool> {
        match self.call(Request::Ping).await? {
            Response::Pong(alive) => Ok(alive),
            other => Err(unexpected("pong", other)),
        }
    }

    async fn identity_name(&self) -> Result<String> {
        match self.call(Request::GetIdentityName).await? {
            Response::Name(name) => Ok(name),
            other => Err(unexpected("name", other)),
        }
    }

    async fn resource_list(&self) -> Result<Vec<ResourceDescriptor>> {
        match self.call(Request::GetResourceList).await? {
            Response::Resources(resources) => Ok(resources),
            other => Err(unexpected("resource list", other)),
        }
    }

    async fn request_transfer(&self, resource: &str, part: u32) -> Result<bool> {
        let request = Request::RequestTransfer {
            resource: resource.to_string(),
            part,
        };
        match Transport::call(&self.endpoint, request, self.transfer_timeout).await? {
            Response::Transfer(done) => Ok(done),
            other => Err(unexpected("transfer result", other)),
        }
    }
}

pub struct RemoteServer {
    endpoint: String,
    rpc_timeout: Duration,
    lookup_timeout: Duration,
}

impl RemoteServer {
    async fn call(&self, request: Request) -> Result<Response> {
        Transport::call(&self.endpoint, request, self.rpc_timeout).await
    }

    async fn call_ack(&self, request: Request) -> Result<()> {
        match self.call(request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected("ack", other)),
        }
    }

    async fn call_peers(&self, request: Request, timeout: Duration) -> Result<Vec<PeerRef>> {
        match Transport::call(&self.endpoint, request, timeout).await? {
            Response::Peers(peers) => Ok(peers),
            other => Err(unexpected("peer list", other)),
        }
    }
}

#[async_trait]
impl ServerHandle for RemoteServer {
    async fn register_client(&self, client: &PeerRef) -> Result<()> {
        self.call_ack(Request::RegisterClient {
            client: client.clone(),
        })
        .await
    }

    async fn unregister_client(&self, client: &PeerRef) -> Result<()> {
        self.call_ack(Request::UnregisterClient {
            client: client.clone(),
        })
        .await
    }

    async fn lookup_resource(&self, resource: &ResourceDescriptor) -> Result<Vec<PeerRef>> {
        let request = Request::LookupResource {
            resource: resource.clone(),
        };
        self.call_peers(request, self.lookup_timeout).await
    }

    async fn local_lookup_resource(&self, resource: &ResourceDescriptor) -> Result<Vec<PeerRef>> {
        let request = Request::LocalLookupResource {
            resource: resource.clone(),
        };
        self.call_peers(request, self.rpc_timeout).await
    }

    async fn identity_name(&self) -> Result<String> {
        match self.call(Request::GetIdentityName).await? {
            Response::Name(name) => Ok(name),
            other => Err(unexpected("name", other)),
        }
    }

    async fn notify_resources_changed(&self, client: &PeerRef) -> Result<()> {
        self.call_ack(Request::NotifyResourcesChanged {
            client: client.clone(),
        })
        .await
    }
}

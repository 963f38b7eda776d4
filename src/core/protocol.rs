use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::core::{PeerRef, ResourceDescriptor};
use crate::utils::{P2PError, Result};

/// One frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub timestamp: u64,
    pub body: MessageBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageBody {
    Request(Request),
    Response(Response),
}

/// Every call a node can receive. Clients, servers and the directory each
/// answer their own subset and reject the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    // Peer (client) surface
    Ping,
    GetIdentityName,
    GetResourceList,
    RequestTransfer { resource: String, part: u32 },

    // Server surface
    RegisterClient { client: PeerRef },
    UnregisterClient { client: PeerRef },
    LookupResource { resource: ResourceDescriptor },
    LocalLookupResource { resource: ResourceDescriptor },
    NotifyResourcesChanged { client: PeerRef },

    // Directory surface
    DirectoryRegister { name: String, endpoint: String },
    DirectoryList { namespace: String },
    DirectoryResolve { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Pong(bool),
    Name(String),
    Resources(Vec<ResourceDescriptor>),
    Transfer(bool),
    Peers(Vec<PeerRef>),
    Names(Vec<String>),
    Endpoint(String),
    NotBound(String),
    Ack,
    Error(String),
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            body,
        }
    }

    pub fn request(request: Request) -> Self {
        Self::new(MessageBody::Request(request))
    }

    /// Builds the reply to `self`, reusing its id so callers can pair them.
    pub fn reply(&self, response: Response) -> Self {
        Self {
            id: self.id,
            ..Self::new(MessageBody::Response(response))
        }
    }

    pub fn into_request(self) -> Result<Request> {
        match self.body {
            MessageBody::Request(request) => Ok(request),
            MessageBody::Response(response) => Err(P2PError::InvalidResponse(format!(
                "expected a request, got {:?}",
                response
            ))),
        }
    }

    pub fn into_response(self) -> Result<Response> {
        match self.body {
            MessageBody::Response(Response::Error(message)) => Err(P2PError::RemoteError(message)),
            MessageBody::Response(Response::NotBound(name)) => Err(P2PError::NotBound(name)),
            MessageBody::Response(response) => Ok(response),
            MessageBody::Request(request) => Err(P2PError::InvalidResponse(format!(
                "expected a response, got {:?}",
                request
            ))),
        }
    }
}

impl Request {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::GetIdentityName => "get-identity-name",
            Request::GetResourceList => "get-resource-list",
            Request::RequestTransfer { .. } => "request-transfer",
            Request::RegisterClient { .. } => "register-client",
            Request::UnregisterClient { .. } => "unregister-client",
            Request::LookupResource { .. } => "lookup-resource",
            Request::LocalLookupResource { .. } => "local-lookup-resource",
            Request::NotifyResourcesChanged { .. } => "notify-resources-changed",
            Request::DirectoryRegister { .. } => "directory-register",
            Request::DirectoryList { .. } => "directory-list",
            Request::DirectoryResolve { .. } => "directory-resolve",
        }
    }
}

impl Response {
    pub fn unsupported(request: &Request) -> Self {
        Response::Error(format!("unsupported request: {}", request.kind()))
    }
}

/// Builds the error for a response of the wrong shape.
pub fn unexpected(expected: &str, got: Response) -> P2PError {
    P2PError::InvalidResponse(format!("expected {}, got {:?}", expected, got))
}

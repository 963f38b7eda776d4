pub mod client;
pub mod config;
pub mod identity;
pub mod peer;
pub mod protocol;
pub mod resource;
pub mod server;

pub use client::{ClientNode, SearchOutcome};
pub use config::{ClientConfig, ServerConfig};
pub use identity::{PeerIdentity, PeerRef};
pub use peer::{ClientHandle, Connector, RemoteClient, RemoteServer, ServerHandle, TcpConnector};
pub use protocol::{Message, MessageBody, Request, Response};
pub use resource::ResourceDescriptor;
pub use server::ServerNode;

//! Mini resource-sharing overlay.
//!
//! Servers index the resources their clients hold and federate with each
//! other through a shared directory. Clients look resources up through their
//! server and download the parts concurrently from every peer holding them.

pub mod core;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export main types
pub use crate::core::{
    ClientConfig, ClientNode, PeerIdentity, PeerRef, ResourceDescriptor, SearchOutcome,
    ServerConfig, ServerNode, TcpConnector,
};
pub use crate::network::{Directory, DirectoryService, MemoryDirectory, RemoteDirectory};
pub use crate::utils::{
    LogSink, MemorySink, NullSink, StatusSink,
    error::{P2PError, Result},
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

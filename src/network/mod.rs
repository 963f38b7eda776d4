pub mod connection;
pub mod directory;
pub mod discovery;
pub mod federation;
pub mod transport;

pub use connection::{RpcHandler, RpcListener};
pub use directory::{Directory, DirectoryService, MemoryDirectory, RemoteDirectory};
pub use discovery::Discovery;
pub use federation::{FederationDaemon, FederationSet};
pub use transport::Transport;

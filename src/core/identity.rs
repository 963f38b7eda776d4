use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

/// 160-bit peer identifier derived from the peer's endpoint.
///
/// The same endpoint always yields the same identity, whichever server or
/// connection a handle came through.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerIdentity([u8; 20]);

impl PeerIdentity {
    pub fn from_endpoint(endpoint: &str) -> Self {
        let hash = Sha256::digest(endpoint.trim().as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[..20]);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerIdentity({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

/// A peer as it travels over the wire: display name plus reachable endpoint.
///
/// Equality and hashing go through the endpoint-derived identity only, so the
/// same peer reported under two names still counts once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRef {
    pub name: String,
    pub endpoint: String,
}

impl PeerRef {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity::from_endpoint(&self.endpoint)
    }
}

impl PartialEq for PeerRef {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for PeerRef {}

impl Hash for PeerRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.endpoint)
    }
}

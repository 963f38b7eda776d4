use log::{debug, info};
use std::sync::Arc;

use crate::core::{ClientHandle, PeerIdentity, PeerRef, ResourceDescriptor};

/// A client registered with this server and what it advertises.
#[derive(Clone)]
pub struct ClientRecord {
    pub peer: PeerRef,
    pub handle: Arc<dyn ClientHandle>,
    pub resources: Vec<ResourceDescriptor>,
}

impl ClientRecord {
    pub fn identity(&self) -> PeerIdentity {
        self.peer.identity()
    }

    pub fn advertises(&self, resource: &ResourceDescriptor) -> bool {
        self.resources.iter().any(|r| r == resource)
    }
}

/// Per-server map from registered clients to their advertised resources.
///
/// Records keep registration order, which is also the order lookups ping
/// and report them in.
#[derive(Default)]
pub struct ResourceIndex {
    records: Vec<ClientRecord>,
}

impl ResourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the record for `peer`. Returns true when the
    /// client was not known before.
    pub fn upsert(
        &mut self,
        peer: PeerRef,
        handle: Arc<dyn ClientHandle>,
        resources: Vec<ResourceDescriptor>,
    ) -> bool {
        let identity = peer.identity();
        match self.position(&identity) {
            Some(pos) => {
                let record = &mut self.records[pos];
                record.peer = peer;
                record.handle = handle;
                record.resources = resources;
                debug!("Updated client {} ({} resources)", identity, record.resources.len());
                false
            }
            None => {
                info!("Indexed client {} ({} resources)", peer, resources.len());
                self.records.push(ClientRecord {
                    peer,
                    handle,
                    resources,
                });
                true
            }
        }
    }

    /// Replaces the advertised resources of a known client.
    pub fn update_resources(
        &mut self,
        identity: &PeerIdentity,
        resources: Vec<ResourceDescriptor>,
    ) -> bool {
        match self.position(identity) {
            Some(pos) => {
                self.records[pos].resources = resources;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, identity: &PeerIdentity) -> Option<ClientRecord> {
        let pos = self.position(identity)?;
        let record = self.records.remove(pos);
        info!("Removed client {} ({} left)", record.peer, self.records.len());
        Some(record)
    }

    pub fn get(&self, identity: &PeerIdentity) -> Option<&ClientRecord> {
        self.position(identity).map(|pos| &self.records[pos])
    }

    /// Copies the records so callers can ping clients without holding the lock.
    pub fn snapshot(&self) -> Vec<ClientRecord> {
        self.records.clone()
    }

    pub fn client_names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.peer.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn position(&self, identity: &PeerIdentity) -> Option<usize> {
        self.records.iter().position(|r| &r.identity() == identity)
    }
}

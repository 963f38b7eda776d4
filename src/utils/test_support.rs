//! In-process peers for unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::{ClientHandle, Connector, PeerRef, ResourceDescriptor, ServerHandle};
use crate::utils::{P2PError, Result};

pub fn resource(name: &str, parts: u32) -> ResourceDescriptor {
    ResourceDescriptor::new(name, parts).unwrap()
}

pub fn peer(name: &str, port: u16) -> PeerRef {
    PeerRef::new(name, format!("127.0.0.1:{}", port))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferBehaviour {
    Succeed,
    Decline,
    Unreachable,
}

/// Tracks how many transfers run at once across a group of mock clients.
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockClient {
    pub name: String,
    alive: AtomicBool,
    resources: Mutex<Vec<ResourceDescriptor>>,
    behaviour: Mutex<TransferBehaviour>,
    delay: Duration,
    budget: Option<usize>,
    gauge: Option<Arc<ConcurrencyGauge>>,
    pings: AtomicUsize,
    transfers: Mutex<Vec<(String, u32)>>,
}

impl MockClient {
    pub fn new(name: &str, resources: Vec<ResourceDescriptor>) -> Self {
        Self {
            name: name.to_string(),
            alive: AtomicBool::new(true),
            resources: Mutex::new(resources),
            behaviour: Mutex::new(TransferBehaviour::Succeed),
            delay: Duration::from_millis(10),
            budget: None,
            gauge: None,
            pings: AtomicUsize::new(0),
            transfers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_behaviour(self, behaviour: TransferBehaviour) -> Self {
        *self.behaviour.lock().unwrap() = behaviour;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Serves `count` transfers, then drops every later one.
    pub fn with_budget(mut self, count: usize) -> Self {
        self.budget = Some(count);
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_resources(&self, resources: Vec<ResourceDescriptor>) {
        *self.resources.lock().unwrap() = resources;
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn transfers(&self) -> Vec<(String, u32)> {
        self.transfers.lock().unwrap().clone()
    }

    fn check_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(P2PError::ConnectionFailed(format!("{} is down", self.name)))
        }
    }
}

#[async_trait]
impl ClientHandle for MockClient {
    async fn ping(&self) -> Result<bool> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.check_alive()?;
        Ok(true)
    }

    async fn identity_name(&self) -> Result<String> {
        self.check_alive()?;
        Ok(self.name.clone())
    }

    async fn resource_list(&self) -> Result<Vec<ResourceDescriptor>> {
        self.check_alive()?;
        Ok(self.resources.lock().unwrap().clone())
    }

    async fn request_transfer(&self, resource: &str, part: u32) -> Result<bool> {
        let served = {
            let mut transfers = self.transfers.lock().unwrap();
            transfers.push((resource.to_string(), part));
            transfers.len() - 1
        };
        let mut behaviour = *self.behaviour.lock().unwrap();
        if self.budget.is_some_and(|budget| served >= budget) {
            behaviour = TransferBehaviour::Unreachable;
        }

        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        tokio::time::sleep(self.delay).await;
        if let Some(gauge) = &self.gauge {
            gauge.leave();
        }

        match behaviour {
            TransferBehaviour::Succeed => Ok(true),
            TransferBehaviour::Decline => Ok(false),
            TransferBehaviour::Unreachable => {
                Err(P2PError::ConnectionFailed(format!("{} dropped", self.name)))
            }
        }
    }
}

pub struct MockServer {
    pub name: String,
    alive: AtomicBool,
    local_matches: Mutex<Vec<PeerRef>>,
    lookups: AtomicUsize,
    local_lookups: AtomicUsize,
    local_lookup_delay: Duration,
    registered: Mutex<Vec<PeerRef>>,
    notified: Mutex<Vec<PeerRef>>,
}

impl MockServer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            alive: AtomicBool::new(true),
            local_matches: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
            local_lookups: AtomicUsize::new(0),
            local_lookup_delay: Duration::ZERO,
            registered: Mutex::new(Vec::new()),
            notified: Mutex::new(Vec::new()),
        }
    }

    pub fn with_matches(self, matches: Vec<PeerRef>) -> Self {
        *self.local_matches.lock().unwrap() = matches;
        self
    }

    /// Makes `local_lookup_resource` stall before answering.
    pub fn with_local_lookup_delay(mut self, delay: Duration) -> Self {
        self.local_lookup_delay = delay;
        self
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_matches(&self, matches: Vec<PeerRef>) {
        *self.local_matches.lock().unwrap() = matches;
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn local_lookup_count(&self) -> usize {
        self.local_lookups.load(Ordering::SeqCst)
    }

    pub fn registered(&self) -> Vec<PeerRef> {
        self.registered.lock().unwrap().clone()
    }

    pub fn notified(&self) -> Vec<PeerRef> {
        self.notified.lock().unwrap().clone()
    }

    fn check_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(P2PError::ConnectionFailed(format!("{} is down", self.name)))
        }
    }
}

#[async_trait]
impl ServerHandle for MockServer {
    async fn register_client(&self, client: &PeerRef) -> Result<()> {
        self.check_alive()?;
        self.registered.lock().unwrap().push(client.clone());
        Ok(())
    }

    async fn unregister_client(&self, client: &PeerRef) -> Result<()> {
        self.check_alive()?;
        self.registered.lock().unwrap().retain(|p| p != client);
        Ok(())
    }

    async fn lookup_resource(&self, _resource: &ResourceDescriptor) -> Result<Vec<PeerRef>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_alive()?;
        Ok(self.local_matches.lock().unwrap().clone())
    }

    async fn local_lookup_resource(&self, _resource: &ResourceDescriptor) -> Result<Vec<PeerRef>> {
        self.local_lookups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.local_lookup_delay).await;
        self.check_alive()?;
        Ok(self.local_matches.lock().unwrap().clone())
    }

    async fn identity_name(&self) -> Result<String> {
        self.check_alive()?;
        Ok(self.name.clone())
    }

    async fn notify_resources_changed(&self, client: &PeerRef) -> Result<()> {
        self.check_alive()?;
        self.notified.lock().unwrap().push(client.clone());
        Ok(())
    }
}

/// Handle that fails every call, standing in for an endpoint nobody listens on.
struct Nowhere(String);

impl Nowhere {
    fn fail<T>(&self) -> Result<T> {
        Err(P2PError::ConnectionFailed(format!("nothing at {}", self.0)))
    }
}

#[async_trait]
impl ClientHandle for Nowhere {
    async fn ping(&self) -> Result<bool> {
        self.fail()
    }
    async fn identity_name(&self) -> Result<String> {
        self.fail()
    }
    async fn resource_list(&self) -> Result<Vec<ResourceDescriptor>> {
        self.fail()
    }
    async fn request_transfer(&self, _resource: &str, _part: u32) -> Result<bool> {
        self.fail()
    }
}

#[async_trait]
impl ServerHandle for Nowhere {
    async fn register_client(&self, _client: &PeerRef) -> Result<()> {
        self.fail()
    }
    async fn unregister_client(&self, _client: &PeerRef) -> Result<()> {
        self.fail()
    }
    async fn lookup_resource(&self, _resource: &ResourceDescriptor) -> Result<Vec<PeerRef>> {
        self.fail()
    }
    async fn local_lookup_resource(&self, _resource: &ResourceDescriptor) -> Result<Vec<PeerRef>> {
        self.fail()
    }
    async fn identity_name(&self) -> Result<String> {
        self.fail()
    }
    async fn notify_resources_changed(&self, _client: &PeerRef) -> Result<()> {
        self.fail()
    }
}

/// Routes endpoints to registered mocks.
#[derive(Default)]
pub struct MockConnector {
    clients: Mutex<HashMap<String, Arc<MockClient>>>,
    servers: Mutex<HashMap<String, Arc<MockServer>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_client(&self, endpoint: &str, client: Arc<MockClient>) {
        self.clients
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), client);
    }

    pub fn add_server(&self, endpoint: &str, server: Arc<MockServer>) {
        self.servers
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), server);
    }
}

impl Connector for MockConnector {
    fn client(&self, peer: &PeerRef) -> Arc<dyn ClientHandle> {
        match self.clients.lock().unwrap().get(&peer.endpoint) {
            Some(client) => client.clone(),
            None => Arc::new(Nowhere(peer.endpoint.clone())),
        }
    }

    fn server(&self, endpoint: &str) -> Arc<dyn ServerHandle> {
        match self.servers.lock().unwrap().get(endpoint) {
            Some(server) => server.clone(),
            None => Arc::new(Nowhere(endpoint.to_string())),
        }
    }
}

use async_trait::async_trait;
use mini_share::core::{Connector, Request, Response};
use mini_share::network::{RpcHandler, RpcListener};
use mini_share::utils::MetricsCollector;
use mini_share::{
    ClientConfig, ClientNode, Directory, DirectoryService, MemoryDirectory, MemorySink, P2PError,
    ResourceDescriptor, SearchOutcome, ServerConfig, ServerNode, TcpConnector,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};

const RPC_TIMEOUT: Duration = Duration::from_secs(2);
const FEDERATION_TIMEOUT: Duration = Duration::from_millis(300);

/// A server that names itself but never answers a local lookup.
struct SilentServer {
    name: String,
}

#[async_trait]
impl RpcHandler for SilentServer {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetIdentityName => Response::Name(self.name.clone()),
            Request::LocalLookupResource { .. } => {
                sleep(Duration::from_secs(30)).await;
                Response::Peers(Vec::new())
            }
            other => Response::unsupported(&other),
        }
    }
}

async fn start_silent_server(
    name: &str,
    directory: &Arc<dyn Directory>,
    shutdown: watch::Receiver<bool>,
) {
    let listener = RpcListener::bind("127.0.0.1:0").await.unwrap();
    directory
        .register(&format!("Server/{}", name), &listener.endpoint())
        .await
        .unwrap();
    listener.serve(
        Arc::new(SilentServer {
            name: name.to_string(),
        }),
        shutdown,
    );
}

fn movie() -> ResourceDescriptor {
    ResourceDescriptor::new("movie", 4).unwrap()
}

fn connector() -> Arc<dyn Connector> {
    Arc::new(TcpConnector::new(RPC_TIMEOUT))
}

async fn start_server(name: &str, directory: Arc<dyn Directory>) -> Arc<ServerNode> {
    let config = ServerConfig {
        name: name.to_string(),
        federation_interval: Duration::from_millis(50),
        federation_timeout: FEDERATION_TIMEOUT,
        rpc_timeout: RPC_TIMEOUT,
        ..ServerConfig::default()
    };
    ServerNode::start(config, directory, connector(), Arc::new(MemorySink::new()))
        .await
        .unwrap()
}

async fn start_client(
    name: &str,
    server: &str,
    resources: Vec<ResourceDescriptor>,
    directory: Arc<dyn Directory>,
) -> (Arc<ClientNode>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let config = ClientConfig {
        name: name.to_string(),
        server_name: Some(server.to_string()),
        download_capacity: 2,
        resources,
        transfer_duration: Duration::from_millis(30),
        rpc_timeout: RPC_TIMEOUT,
        ..ClientConfig::default()
    };
    let node = ClientNode::start(config, directory, connector(), sink.clone())
        .await
        .unwrap();
    (node, sink)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_across_federated_servers() {
    let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let a = start_server("a", directory.clone()).await;
    let b = start_server("b", directory.clone()).await;

    let (alice, _) = start_client("alice", "a", vec![movie()], directory.clone()).await;
    let (bob, _) = start_client("bob", "b", vec![movie()], directory.clone()).await;
    let (carol, carol_sink) = start_client("carol", "a", Vec::new(), directory.clone()).await;

    // Let both federation daemons find each other.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(a.siblings().await, vec!["b"]);
    assert_eq!(b.siblings().await, vec!["a"]);

    let holders = a.discovery().lookup(&movie()).await;
    assert_eq!(holders.len(), 2);
    assert_eq!(holders[0].name, "alice");
    assert_eq!(holders[1].name, "bob");

    let outcome = carol.search("movie 4").await.unwrap();
    match outcome {
        SearchOutcome::Downloaded(report) => {
            assert_eq!(report.limit, 2);
            assert!(report.peak_active <= 2);
            assert!(report.evicted.is_empty());
        }
        SearchOutcome::NotFound => panic!("movie should be found"),
    }
    assert_eq!(carol.resources().await, vec![movie()]);
    assert_eq!(carol_sink.snapshot().resources, vec![movie()]);

    // carol told server a, so b now sees three holders through federation.
    let holders = b.discovery().lookup(&movie()).await;
    assert_eq!(holders.len(), 3);

    assert!(matches!(
        carol.search("movie 4").await.unwrap_err(),
        P2PError::AlreadyHeld(_)
    ));
    assert!(matches!(
        carol.search("nothing 2").await.unwrap(),
        SearchOutcome::NotFound
    ));

    for client in [&alice, &bob, &carol] {
        client.shutdown().await;
    }
    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_search_succeeds_while_siblings_hang() {
    let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let a = start_server("a", directory.clone()).await;
    start_silent_server("b", &directory, shutdown_rx.clone()).await;
    start_silent_server("c", &directory, shutdown_rx).await;

    let (alice, _) = start_client("alice", "a", vec![movie()], directory.clone()).await;
    let (carol, _) = start_client("carol", "a", Vec::new(), directory.clone()).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(a.siblings().await, vec!["b", "c"]);

    let started = Instant::now();
    let outcome = carol.search("movie 4").await.unwrap();

    assert!(matches!(outcome, SearchOutcome::Downloaded(_)));
    assert!(started.elapsed() < RPC_TIMEOUT);
    assert_eq!(carol.resources().await, vec![movie()]);

    alice.shutdown().await;
    carol.shutdown().await;
    a.shutdown().await;
    shutdown_tx.send(true).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stopped_server_is_dropped_from_federation() {
    let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let a = start_server("a", directory.clone()).await;
    let b = start_server("b", directory.clone()).await;
    let (alice, _) = start_client("alice", "a", vec![movie()], directory.clone()).await;
    let (bob, _) = start_client("bob", "b", vec![movie()], directory.clone()).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(a.discovery().lookup(&movie()).await.len(), 2);

    b.shutdown().await;

    let holders = a.discovery().lookup(&movie()).await;
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].name, "alice");
    assert!(a.siblings().await.is_empty());

    alice.shutdown().await;
    bob.shutdown().await;
    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_falls_back_when_its_server_stops() {
    let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let a = start_server("a", directory.clone()).await;
    let b = start_server("b", directory.clone()).await;
    let (alice, _) = start_client("alice", "b", vec![movie()], directory.clone()).await;
    let (carol, _) = start_client("carol", "a", Vec::new(), directory.clone()).await;

    a.shutdown().await;
    let outcome = carol.search("movie 4").await.unwrap();

    assert!(matches!(outcome, SearchOutcome::Downloaded(_)));
    assert_eq!(carol.server_name().await.as_deref(), Some("b"));

    alice.shutdown().await;
    carol.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nodes_over_remote_directory() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (endpoint, directory_task) = DirectoryService::new(MemoryDirectory::new())
        .start("127.0.0.1:0", shutdown_rx)
        .await
        .unwrap();
    let directory: Arc<dyn Directory> =
        Arc::new(mini_share::RemoteDirectory::new(endpoint, RPC_TIMEOUT));

    let a = start_server("a", directory.clone()).await;
    let (alice, _) = start_client("alice", "a", vec![movie()], directory.clone()).await;
    let (carol, _) = start_client("carol", "a", Vec::new(), directory.clone()).await;

    assert_eq!(directory.list_names("Server").await.unwrap(), vec!["a"]);
    assert_eq!(
        directory.list_names("Client").await.unwrap(),
        vec!["alice", "carol"]
    );

    let outcome = carol.search("movie 4").await.unwrap();
    assert!(matches!(outcome, SearchOutcome::Downloaded(_)));

    let metrics: &MetricsCollector = alice.metrics();
    assert_eq!(metrics.get_metrics().await.transfers_served, 4);

    alice.shutdown().await;
    carol.shutdown().await;
    a.shutdown().await;
    shutdown_tx.send(true).unwrap();
    directory_task.await.unwrap();
}

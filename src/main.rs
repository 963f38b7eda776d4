use clap::{Parser, Subcommand};
use log::{error, info};
use mini_share::{
    ClientConfig, ClientNode, DirectoryService, LogSink, MemoryDirectory, RemoteDirectory,
    ResourceDescriptor, Result, SearchOutcome, ServerConfig, ServerNode, TcpConnector,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "mini-share")]
#[command(about = "A federated peer-to-peer resource sharing overlay")]
#[command(version)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the name directory servers and clients register in
    Directory {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7000")]
        listen: String,
    },
    /// Run a discovery server
    Server {
        /// Server name, registered as Server/<name>
        #[arg(short, long)]
        name: String,
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:0")]
        listen: String,
        /// Directory address (host:port)
        #[arg(short, long, default_value = "127.0.0.1:7000")]
        directory: String,
        /// Milliseconds between federation refreshes
        #[arg(long, default_value = "2000")]
        interval_ms: u64,
    },
    /// Run a client and read commands from stdin
    Client {
        /// Client name
        #[arg(short, long)]
        name: String,
        /// Server to join first
        #[arg(short, long)]
        server: Option<String>,
        /// Parts downloaded at the same time
        #[arg(short, long, default_value = "2")]
        capacity: usize,
        /// Address to serve peers on
        #[arg(short, long, default_value = "127.0.0.1:0")]
        listen: String,
        /// Directory address (host:port)
        #[arg(short, long, default_value = "127.0.0.1:7000")]
        directory: String,
        /// Milliseconds it takes to serve one part
        #[arg(long, default_value = "5000")]
        transfer_ms: u64,
        /// Give up on a part after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Initially held resources as NAME PARTS pairs
        resources: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Directory { listen } => {
            mini_share::utils::setup_logging("directory", cli.verbose);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (endpoint, task) = DirectoryService::new(MemoryDirectory::new())
                .start(&listen, shutdown_rx)
                .await?;
            println!("Directory listening on {}", endpoint);

            wait_for_ctrl_c().await;
            let _ = shutdown_tx.send(true);
            let _ = task.await;
        }
        Commands::Server {
            name,
            listen,
            directory,
            interval_ms,
        } => {
            mini_share::utils::setup_logging(&name, cli.verbose);
            let config = ServerConfig {
                name: name.clone(),
                listen_addr: listen,
                federation_interval: Duration::from_millis(interval_ms),
                ..ServerConfig::default()
            };
            let directory = Arc::new(RemoteDirectory::new(directory, config.rpc_timeout));
            let connector = Arc::new(TcpConnector::new(config.rpc_timeout));

            let node = ServerNode::start(config, directory, connector, Arc::new(LogSink::new(name)))
                .await?;
            println!("Server {} listening on {}", node.name(), node.endpoint());

            wait_for_ctrl_c().await;
            node.metrics().print_stats().await;
            node.shutdown().await;
        }
        Commands::Client {
            name,
            server,
            capacity,
            listen,
            directory,
            transfer_ms,
            timeout_ms,
            resources,
        } => {
            mini_share::utils::setup_logging(&name, cli.verbose);
            let config = ClientConfig {
                name: name.clone(),
                listen_addr: listen,
                server_name: server,
                download_capacity: capacity,
                resources: ResourceDescriptor::parse_pairs(&resources)?,
                transfer_duration: Duration::from_millis(transfer_ms),
                transfer_timeout: timeout_ms.map(Duration::from_millis),
                ..ClientConfig::default()
            };
            let directory = Arc::new(RemoteDirectory::new(directory, config.rpc_timeout));
            let connector = Arc::new(
                TcpConnector::new(config.rpc_timeout).with_transfer_timeout(config.transfer_timeout),
            );

            let node = ClientNode::start(config, directory, connector, Arc::new(LogSink::new(name)))
                .await?;
            println!(
                "Client {} serving peers on {}. Type '<name> <parts>', 'list' or 'quit'.",
                node.name(),
                node.peer_ref().endpoint
            );

            tokio::select! {
                _ = command_loop(node.clone()) => {}
                _ = wait_for_ctrl_c() => {}
            }
            node.metrics().print_stats().await;
            node.shutdown().await;
        }
    }

    Ok(())
}

async fn command_loop(node: Arc<ClientNode>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "list" => {
                for resource in node.resources().await {
                    println!("  {}", resource);
                }
            }
            query => match node.search(query).await {
                Ok(SearchOutcome::Downloaded(report)) => {
                    println!("Downloaded {}", report.resource);
                }
                Ok(SearchOutcome::NotFound) => println!("Nobody holds {}", query),
                Err(e) => println!("Search failed: {}", e),
            },
        }
    }
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
        return;
    }
    info!("Ctrl+C received, shutting down");
}

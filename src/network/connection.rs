use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

use crate::core::{Request, Response};
use crate::network::Transport;
use crate::utils::{P2PError, Result};

/// Answers the requests arriving on an [`RpcListener`].
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Response;
}

/// Accepts RPC connections and serves each one on its own task.
pub struct RpcListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl RpcListener {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        info!("Listening for RPC on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The endpoint other nodes should use to reach this listener.
    pub fn endpoint(&self) -> String {
        self.local_addr.to_string()
    }

    /// Runs the accept loop until `shutdown` flips to `true`.
    pub fn serve(
        self,
        handler: Arc<dyn RpcHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            debug!("New connection from: {}", addr);
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    debug!("Connection from {} ended: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            sleep(Duration::from_millis(200)).await;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("RPC listener on {} stopped", self.local_addr);
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn handle_connection(mut stream: TcpStream, handler: Arc<dyn RpcHandler>) -> Result<()> {
        stream.set_nodelay(true)?;

        // A caller may reuse its connection; serve until it hangs up.
        loop {
            let message = match Transport::receive_message(&mut stream).await {
                Ok(message) => message,
                Err(P2PError::IoError(_)) => return Ok(()),
                Err(e) => return Err(e),
            };

            let response = match message.clone().into_request() {
                Ok(request) => handler.handle(request).await,
                Err(e) => {
                    warn!("Rejected frame {}: {}", message.id, e);
                    Response::Error(e.to_string())
                }
            };

            Transport::send_message(&mut stream, &message.reply(response)).await?;
        }
    }
}

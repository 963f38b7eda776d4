use log::debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::core::{Message, Request, Response};
use crate::utils::{P2PError, Result};

/// Largest frame accepted from the wire.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

pub struct Transport;

impl Transport {
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<TcpStream> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| P2PError::Timeout(format!("connecting to {}", endpoint)))?
            .map_err(|e| {
                P2PError::ConnectionFailed(format!("Failed to connect to {}: {}", endpoint, e))
            })?;

        stream
            .set_nodelay(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set TCP_NODELAY: {}", e)))?;
        Ok(stream)
    }

    pub async fn send_data<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(P2PError::MessageTooLarge(data.len()));
        }
        stream.write_u32(data.len() as u32).await?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn receive_data<R: AsyncRead + Unpin>(
        stream: &mut R,
        max_size: usize,
    ) -> Result<Vec<u8>> {
        let len = stream.read_u32().await? as usize;

        if len > max_size {
            return Err(P2PError::MessageTooLarge(len));
        }

        let mut buffer = vec![0u8; len];
        stream.read_exact(&mut buffer).await?;

        Ok(buffer)
    }

    pub async fn send_message<W: AsyncWrite + Unpin>(stream: &mut W, message: &Message) -> Result<()> {
        let serialized = serde_json::to_vec(message)?;
        Self::send_data(stream, &serialized).await
    }

    pub async fn receive_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Message> {
        let buffer = Self::receive_data(stream, MAX_FRAME_SIZE).await?;
        Ok(serde_json::from_slice(&buffer)?)
    }

    /// Performs one request/response exchange on a fresh connection.
    ///
    /// The whole exchange, connect included, is bounded by `timeout`.
    pub async fn call(endpoint: &str, request: Request, timeout: Duration) -> Result<Response> {
        let kind = request.kind();
        let exchange = async {
            let mut stream = Self::connect(endpoint, timeout).await?;
            let message = Message::request(request);
            Self::send_message(&mut stream, &message).await?;

            let reply = Self::receive_message(&mut stream).await?;
            if reply.id != message.id {
                return Err(P2PError::InvalidResponse(format!(
                    "reply {} does not match request {}",
                    reply.id, message.id
                )));
            }
            reply.into_response()
        };

        let response = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| P2PError::Timeout(format!("{} to {}", kind, endpoint)))??;

        debug!("{} to {} answered", kind, endpoint);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let message = Message::request(Request::RequestTransfer {
            resource: "movie".to_string(),
            part: 3,
        });

        Transport::send_message(&mut client, &message).await.unwrap();
        let received = Transport::receive_message(&mut server).await.unwrap();

        assert_eq!(received.id, message.id);
        assert_eq!(
            received.into_request().unwrap(),
            Request::RequestTransfer {
                resource: "movie".to_string(),
                part: 3
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = client.write_u32(u32::MAX).await;
        });

        let result = Transport::receive_data(&mut server, 16).await;
        assert!(matches!(result, Err(P2PError::MessageTooLarge(_))));
    }

    #[tokio::test]
    async fn test_call_to_closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = Transport::call(&endpoint, Request::Ping, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }
}

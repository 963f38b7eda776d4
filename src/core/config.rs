use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::ResourceDescriptor;
use crate::utils::{P2PError, Result};

/// Directory namespace under which servers register themselves.
pub const SERVER_NAMESPACE: &str = "Server";
/// Directory namespace reserved for client nodes.
pub const CLIENT_NAMESPACE: &str = "Client";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub listen_addr: String,
    #[serde(with = "duration_ms")]
    pub federation_interval: Duration,
    /// Bound for one sibling's answer during a federated lookup.
    #[serde(with = "duration_ms")]
    pub federation_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub rpc_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "DefaultServer".to_string(),
            listen_addr: "127.0.0.1:0".to_string(),
            federation_interval: Duration::from_secs(2),
            federation_timeout: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if self.federation_interval.is_zero() {
            return Err(P2PError::ConfigError(
                "federation interval must be positive".to_string(),
            ));
        }
        if self.federation_timeout.is_zero() || self.federation_timeout > self.rpc_timeout {
            return Err(P2PError::ConfigError(format!(
                "federation timeout {:?} must be positive and at most the RPC timeout {:?}",
                self.federation_timeout, self.rpc_timeout
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    pub listen_addr: String,
    /// Server to join first; any registered server is tried when absent or down.
    pub server_name: Option<String>,
    /// Maximum number of parts downloaded at the same time.
    pub download_capacity: usize,
    pub resources: Vec<ResourceDescriptor>,
    /// How long serving one part takes on this node.
    #[serde(with = "duration_ms")]
    pub transfer_duration: Duration,
    /// Upper bound for one part download; `None` waits for the peer forever.
    #[serde(with = "option_duration_ms")]
    pub transfer_timeout: Option<Duration>,
    #[serde(with = "duration_ms")]
    pub rpc_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "DefaultClient".to_string(),
            listen_addr: "127.0.0.1:0".to_string(),
            server_name: None,
            download_capacity: 2,
            resources: Vec::new(),
            transfer_duration: Duration::from_secs(5),
            transfer_timeout: None,
            rpc_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if let Some(timeout) = self.transfer_timeout {
            if timeout <= self.transfer_duration {
                return Err(P2PError::ConfigError(format!(
                    "transfer timeout {:?} must exceed the transfer duration {:?}",
                    timeout, self.transfer_duration
                )));
            }
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(P2PError::ConfigError(format!(
            "node name {:?} must be a non-empty token without '/'",
            name
        )));
    }
    Ok(())
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

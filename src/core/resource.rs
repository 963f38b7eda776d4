use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{P2PError, Result};

/// A named resource made of a fixed number of equally weighted parts.
///
/// Two descriptors are the same resource only if both the name and the part
/// count match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub total_parts: u32,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, total_parts: u32) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(P2PError::InvalidQuery(format!(
                "resource name {:?} must be a single non-empty token",
                name
            )));
        }
        if total_parts == 0 {
            return Err(P2PError::InvalidQuery(format!(
                "resource {} must have at least one part",
                name
            )));
        }
        Ok(Self { name, total_parts })
    }

    /// Parses a `"<name> <parts>"` query. Tokens after the second are ignored.
    pub fn parse_query(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let (name, parts) = match (tokens.next(), tokens.next()) {
            (Some(name), Some(parts)) => (name, parts),
            _ => {
                return Err(P2PError::InvalidQuery(
                    "expected a resource name followed by its part count".to_string(),
                ));
            }
        };

        let total_parts = parts.parse::<u32>().map_err(|_| {
            P2PError::InvalidQuery(format!("part count {:?} is not a number", parts))
        })?;

        Self::new(name, total_parts)
    }

    /// Parses `NAME PARTS NAME PARTS ...` pairs, as given on the command line.
    pub fn parse_pairs(tokens: &[String]) -> Result<Vec<Self>> {
        if tokens.len() % 2 != 0 {
            return Err(P2PError::ConfigError(
                "resources must be given as NAME PARTS pairs".to_string(),
            ));
        }
        tokens
            .chunks(2)
            .map(|pair| Self::parse_query(&format!("{} {}", pair[0], pair[1])))
            .collect()
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.total_parts)
    }
}

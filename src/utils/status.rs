//! One-way status notifications for whatever front end is attached to a node.
//!
//! Nodes publish logs, client and server lists, local resources and the
//! download queue here. Nothing is ever read back by the protocol code, so a
//! missing or slow front end cannot change protocol behaviour.

use log::info;
use std::sync::{Mutex, MutexGuard};

use crate::core::ResourceDescriptor;

pub trait StatusSink: Send + Sync {
    fn append_log(&self, text: &str);
    fn set_client_list(&self, names: Vec<String>);
    fn set_server_list(&self, names: Vec<String>);
    fn set_local_resources(&self, resources: Vec<ResourceDescriptor>);
    fn set_download_queue(&self, entries: Vec<String>);
}

/// Discards everything.
pub struct NullSink;

impl StatusSink for NullSink {
    fn append_log(&self, _text: &str) {}
    fn set_client_list(&self, _names: Vec<String>) {}
    fn set_server_list(&self, _names: Vec<String>) {}
    fn set_local_resources(&self, _resources: Vec<ResourceDescriptor>) {}
    fn set_download_queue(&self, _entries: Vec<String>) {}
}

/// Forwards every notification to the `log` facade.
pub struct LogSink {
    node_name: String,
}

impl LogSink {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }
}

impl StatusSink for LogSink {
    fn append_log(&self, text: &str) {
        info!("[{}] {}", self.node_name, text);
    }

    fn set_client_list(&self, names: Vec<String>) {
        info!("[{}] clients: [{}]", self.node_name, names.join(", "));
    }

    fn set_server_list(&self, names: Vec<String>) {
        info!("[{}] sibling servers: [{}]", self.node_name, names.join(", "));
    }

    fn set_local_resources(&self, resources: Vec<ResourceDescriptor>) {
        let rendered: Vec<String> = resources.iter().map(|r| r.to_string()).collect();
        info!("[{}] resources: [{}]", self.node_name, rendered.join(", "));
    }

    fn set_download_queue(&self, entries: Vec<String>) {
        for entry in entries {
            info!("[{}] queue: {}", self.node_name, entry);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub logs: Vec<String>,
    pub clients: Vec<String>,
    pub servers: Vec<String>,
    pub resources: Vec<ResourceDescriptor>,
    pub download_queue: Vec<String>,
}

/// Keeps the latest published values in memory for polling front ends.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<StatusSnapshot>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        // A panic while holding the guard cannot leave the snapshot half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StatusSink for MemorySink {
    fn append_log(&self, text: &str) {
        self.lock().logs.push(text.to_string());
    }

    fn set_client_list(&self, names: Vec<String>) {
        self.lock().clients = names;
    }

    fn set_server_list(&self, names: Vec<String>) {
        self.lock().servers = names;
    }

    fn set_local_resources(&self, resources: Vec<ResourceDescriptor>) {
        self.lock().resources = resources;
    }

    fn set_download_queue(&self, entries: Vec<String>) {
        self.lock().download_queue = entries;
    }
}

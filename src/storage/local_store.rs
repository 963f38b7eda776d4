use log::info;

use crate::core::ResourceDescriptor;

/// Resources a client holds and offers to other peers.
#[derive(Debug, Default, Clone)]
pub struct LocalStore {
    resources: Vec<ResourceDescriptor>,
}

impl LocalStore {
    pub fn new(initial: Vec<ResourceDescriptor>) -> Self {
        let mut store = Self::default();
        for resource in initial {
            store.add(resource);
        }
        store
    }

    /// Adds a resource; returns false if it was already held.
    pub fn add(&mut self, resource: ResourceDescriptor) -> bool {
        if self.holds(&resource) {
            return false;
        }
        info!("Now holding resource {}", resource);
        self.resources.push(resource);
        true
    }

    pub fn holds(&self, resource: &ResourceDescriptor) -> bool {
        self.resources.contains(resource)
    }

    /// True if some held resource called `name` has a part `part`.
    pub fn has_part(&self, name: &str, part: u32) -> bool {
        self.resources
            .iter()
            .any(|r| r.name == name && part < r.total_parts)
    }

    pub fn list(&self) -> Vec<ResourceDescriptor> {
        self.resources.clone()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::client::Client;

/// Caller-owned lookup of clients by device id.
///
/// Clients are handed out as `Arc`s so workers can keep using one after it
/// has been replaced or removed; the session closes when the last handle drops.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<u8, Arc<Client>>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` under its device id, returning the client it replaced.
    pub fn insert(&self, client: Client) -> Option<Arc<Client>> {
        let device_id = client.device_id();
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id, Arc::new(client))
    }

    /// Client registered for `device_id`.
    pub fn get(&self, device_id: u8) -> Option<Arc<Client>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device_id)
            .cloned()
    }

    /// Unregister the client for `device_id`.
    pub fn remove(&self, device_id: u8) -> Option<Arc<Client>> {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&device_id)
    }

    /// Registered device ids in ascending order.
    pub fn device_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

//! Readiness gate on local network state

use crate::error::{LinkError, Result};
use crate::resource::ResourceKey;
use crate::store::ResourceStore;

/// Answers whether local networking is usable for provisioning
pub struct ReadinessGate<'a> {
    store: &'a dyn ResourceStore,
    key: ResourceKey,
}

impl<'a> ReadinessGate<'a> {
    /// Gate on the well-known network status resource
    pub fn new(store: &'a dyn ResourceStore) -> Self {
        Self {
            store,
            key: ResourceKey::network_status(),
        }
    }

    /// Key of the status resource the gate reads
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Whether the node has a usable address
    ///
    /// A missing status resource means networking has not reported yet and
    /// reads as not ready.
    pub async fn address_ready(&self) -> Result<bool> {
        let status = self
            .store
            .get(&self.key)
            .await
            .map_err(LinkError::NetworkStatus)?;

        Ok(status
            .as_ref()
            .and_then(|resource| resource.spec.as_network_status())
            .is_some_and(|spec| spec.address_ready))
    }
}

//! Hardware identity source

use crate::error::{LinkError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Source of the stable node identifier sent to the provisioning service
#[async_trait]
pub trait NodeIdSource: Send + Sync {
    /// Node UUID in canonical lowercase hyphenated form
    async fn node_uuid(&self) -> Result<String>;
}

/// Reads the SMBIOS system UUID exported by the kernel
#[derive(Debug, Clone)]
pub struct DmiProductUuid {
    path: PathBuf,
}

impl DmiProductUuid {
    /// Read the UUID from `path` (normally `/sys/class/dmi/id/product_uuid`)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location the UUID is read from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NodeIdSource for DmiProductUuid {
    async fn node_uuid(&self) -> Result<String> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| LinkError::NodeId(format!("{}: {e}", self.path.display())))?;

        canonical_uuid(raw.trim())
    }
}

/// Fixed node identifier
#[derive(Debug, Clone)]
pub struct StaticNodeId(String);

impl StaticNodeId {
    /// Use `uuid` as the node identifier; it must be a valid UUID
    pub fn new(uuid: &str) -> Result<Self> {
        Ok(Self(canonical_uuid(uuid)?))
    }
}

#[async_trait]
impl NodeIdSource for StaticNodeId {
    async fn node_uuid(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

fn canonical_uuid(raw: &str) -> Result<String> {
    let uuid =
        Uuid::parse_str(raw).map_err(|e| LinkError::NodeId(format!("invalid UUID {raw:?}: {e}")))?;

    Ok(uuid.hyphenated().to_string())
}

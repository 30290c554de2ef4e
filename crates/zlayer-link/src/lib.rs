//! ZLayer Link - boot-time provisioning of the WireGuard management link
//!
//! When the kernel command line carries the `zlayer.link.api` parameter, the
//! node waits until local networking has an address, asks the provisioning
//! service for its link parameters and publishes a WireGuard link spec and
//! an address spec into the resource store. The network layer consuming
//! those specs brings the interface up.
//!
//! # Modules
//!
//! - [`cmdline`] - Kernel command line parsing
//! - [`config`] - Link configuration
//! - [`controller`] - The provisioning state machine
//! - [`endpoint`] - Boot parameter parsing into an endpoint descriptor
//! - [`error`] - Error types
//! - [`hwid`] - Node UUID sources
//! - [`identity`] - WireGuard keypair of the node
//! - [`provision`] - gRPC provisioning client
//! - [`readiness`] - Network readiness gate
//! - [`resource`] - Network resource model
//! - [`store`] - Resource store backends
//! - [`synth`] - Link and address spec synthesis
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokio::sync::watch;
//! use zlayer_link::{
//!     Cmdline, DmiProductUuid, GrpcConnector, LinkConfig, LinkController, MemoryStore,
//!     ResourceKey,
//! };
//!
//! let config = LinkConfig::default();
//! let cmdline = Cmdline::read(&config.cmdline_path).await?;
//! let store = MemoryStore::new();
//! let events = store.watch(ResourceKey::network_status()).await;
//! let (_stop, shutdown) = watch::channel(false);
//!
//! let mut controller = LinkController::new(
//!     config.clone(),
//!     cmdline,
//!     Arc::new(store),
//!     Arc::new(GrpcConnector::new()),
//!     Arc::new(DmiProductUuid::new(&config.product_uuid_path)),
//! );
//!
//! let outcome = controller.run(events, shutdown).await?;
//! ```

pub mod cmdline;
pub mod config;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod hwid;
pub mod identity;
pub mod provision;
pub mod readiness;
pub mod resource;
pub mod store;
pub mod synth;

// Re-export commonly used types
pub use cmdline::Cmdline;
pub use config::{LinkConfig, DEFAULT_KEEPALIVE_SECS, DEFAULT_KERNEL_PARAM, DEFAULT_LINK_NAME};
pub use controller::{LinkController, LinkOutcome, LinkState};
pub use endpoint::{parse_endpoint, EndpointDescriptor};
pub use error::{EndpointError, LinkError, Result, StoreError};
pub use hwid::{DmiProductUuid, NodeIdSource, StaticNodeId};
pub use identity::{KeyPair, LinkIdentity};
pub use provision::{
    Connector, GrpcConnector, ProvisionRequest, ProvisionResponse, Provisioner,
};
pub use readiness::ReadinessGate;
pub use resource::*;
pub use store::{EventReceiver, FileStore, MemoryStore, ResourceStore, UpsertRequest};
pub use synth::{synthesize, LinkSpecs};

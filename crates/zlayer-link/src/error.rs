//! Error types for management link provisioning

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a link controller run
///
/// A malformed boot parameter has no variant here: it degrades to
/// a warning (see [`EndpointError`]) and never stops the controller.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Kernel command line could not be read
    #[error("failed to read kernel command line at {path}: {source}")]
    Cmdline {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hardware identity could not be determined
    #[error("error reading node UUID: {0}")]
    NodeId(String),

    /// Link private key could not be generated
    #[error("error generating WireGuard key: {0}")]
    KeyGeneration(String),

    /// Invalid key format
    #[error("invalid key format: {0}")]
    InvalidKey(String),

    /// Provisioning endpoint could not be dialed
    #[error("error dialing provisioning endpoint {endpoint:?}: {reason}")]
    Dial { endpoint: String, reason: String },

    /// Provisioning RPC failed
    #[error("error accessing provisioning API: {0}")]
    Rpc(#[from] tonic::Status),

    /// Server address in the provisioning response is not an IP literal
    #[error("error parsing server address {value:?}: {source}")]
    InvalidServerAddress {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// Node address prefix in the provisioning response is not a prefix literal
    #[error("error parsing node address {value:?}: {source}")]
    InvalidNodePrefix {
        value: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    /// Network status could not be read
    #[error("error reading network status: {0}")]
    NetworkStatus(#[source] StoreError),

    /// A published spec could not be written
    #[error("error creating {what} spec: {source}")]
    Publish {
        what: &'static str,
        #[source]
        source: StoreError,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors produced while parsing the link endpoint boot parameter
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The descriptor is not a valid URI
    #[error("invalid endpoint URI {value:?}: {source}")]
    InvalidUri {
        value: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    /// The URI carries no host part
    #[error("endpoint URI {0:?} has no host")]
    MissingHost(String),
}

/// Resource store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The resource exists with a spec of another kind
    #[error("resource {key} holds a {found} spec")]
    KindMismatch { key: String, found: &'static str },

    /// The upsert mutator rejected the existing resource
    #[error("modify rejected for {key}: {reason}")]
    Rejected { key: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

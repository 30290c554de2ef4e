//! Provisioning client
//!
//! One unary gRPC call: the node presents its UUID, its WireGuard public
//! key and an optional join token; the service answers with its own key,
//! its reachable endpoint and the address to assign to the node.

use crate::endpoint::EndpointDescriptor;
use crate::error::{LinkError, Result};
use async_trait::async_trait;
use http::uri::PathAndQuery;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

/// gRPC path of the provisioning method
pub const PROVISION_PATH: &str = "/zlayer.link.v1.ProvisionService/Provision";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProvisionRequest {
    #[prost(string, tag = "1")]
    pub node_uuid: ::prost::alloc::string::String,
    /// Base64 encoded WireGuard public key
    #[prost(string, tag = "2")]
    pub node_public_key: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "3")]
    pub join_token: ::core::option::Option<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProvisionResponse {
    /// `host:port` the node sends WireGuard traffic to
    #[prost(string, tag = "1")]
    pub server_endpoint: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub server_public_key: ::prost::alloc::string::String,
    /// Address to assign to the node, in prefix notation
    #[prost(string, tag = "3")]
    pub node_address_prefix: ::prost::alloc::string::String,
    /// Server address inside the link
    #[prost(string, tag = "4")]
    pub server_address: ::prost::alloc::string::String,
}

/// Client for the provisioning service
#[derive(Debug, Clone)]
pub struct ProvisionServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl ProvisionServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn provision(
        &mut self,
        request: impl tonic::IntoRequest<ProvisionRequest>,
    ) -> std::result::Result<tonic::Response<ProvisionResponse>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("Service was not ready: {e}")))?;

        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(PROVISION_PATH);
        self.inner.unary(request.into_request(), path, codec).await
    }
}

/// Performs the provisioning exchange
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionResponse>;
}

/// Opens the single provisioning connection of a controller run
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &EndpointDescriptor) -> Result<Arc<dyn Provisioner>>;
}

/// gRPC connector
///
/// TLS uses the system trust roots unless the descriptor asks for a
/// plaintext transport. The channel connects on first use.
#[derive(Debug, Clone, Default)]
pub struct GrpcConnector {
    connect_timeout: Option<Duration>,
}

impl GrpcConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the time spent establishing the transport connection
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn endpoint(&self, descriptor: &EndpointDescriptor) -> Result<Endpoint> {
        let dial_error = |reason: String| LinkError::Dial {
            endpoint: descriptor.host.clone(),
            reason,
        };

        let mut endpoint = Endpoint::from_shared(descriptor.transport_uri())
            .map_err(|e| dial_error(e.to_string()))?;

        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        if !descriptor.insecure {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| dial_error(e.to_string()))?;
        }

        Ok(endpoint)
    }
}

impl Connector for GrpcConnector {
    fn connect(&self, descriptor: &EndpointDescriptor) -> Result<Arc<dyn Provisioner>> {
        let channel = self.endpoint(descriptor)?.connect_lazy();

        tracing::debug!(
            endpoint = %descriptor.host,
            insecure = descriptor.insecure,
            "Created provisioning channel"
        );

        Ok(Arc::new(GrpcProvisioner {
            client: ProvisionServiceClient::new(channel),
        }))
    }
}

/// [`Provisioner`] backed by a gRPC channel
#[derive(Debug, Clone)]
pub struct GrpcProvisioner {
    client: ProvisionServiceClient,
}

#[async_trait]
impl Provisioner for GrpcProvisioner {
    async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionResponse> {
        let mut client = self.client.clone();
        let response = client.provision(request).await?;
        Ok(response.into_inner())
    }
}

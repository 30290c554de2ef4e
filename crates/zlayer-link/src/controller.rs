//! Management link controller
//!
//! Drives the boot-time provisioning of the management link: waits for
//! local networking, asks the provisioning service for link parameters and
//! publishes the resulting link and address specs. A run completes after
//! the first successful publish.

use crate::cmdline::Cmdline;
use crate::config::LinkConfig;
use crate::endpoint::{parse_endpoint, EndpointDescriptor};
use crate::error::{LinkError, Result};
use crate::hwid::NodeIdSource;
use crate::identity::LinkIdentity;
use crate::provision::{Connector, ProvisionRequest, ProvisionResponse, Provisioner};
use crate::readiness::ReadinessGate;
use crate::resource::ResourceSpec;
use crate::store::{EventReceiver, ResourceStore, UpsertRequest};
use crate::synth::{synthesize, LinkSpecs};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    CheckingKernelParam,
    WaitingForTrigger,
    AwaitingReadiness,
    Provisioning,
    Publishing,
    Done,
    Failed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Idle => "idle",
            LinkState::CheckingKernelParam => "checking_kernel_param",
            LinkState::WaitingForTrigger => "waiting_for_trigger",
            LinkState::AwaitingReadiness => "awaiting_readiness",
            LinkState::Provisioning => "provisioning",
            LinkState::Publishing => "publishing",
            LinkState::Done => "done",
            LinkState::Failed => "failed",
        }
    }

    /// Whether a run has ended in this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Done | LinkState::Failed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a controller run that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The kernel parameter is absent; nothing was done
    Disabled,

    /// Shutdown was requested, or the event source closed, before publishing
    Cancelled,

    /// Link and address specs were published
    Published(Box<LinkSpecs>),
}

/// Management link controller
///
/// Owns the link identity, so the keypair survives across runs of the
/// same controller. Everything that touches the outside world is injected.
pub struct LinkController {
    config: LinkConfig,
    cmdline: Cmdline,
    identity: LinkIdentity,
    store: Arc<dyn ResourceStore>,
    connector: Arc<dyn Connector>,
    node_id: Arc<dyn NodeIdSource>,
    state: LinkState,
}

impl LinkController {
    pub fn new(
        config: LinkConfig,
        cmdline: Cmdline,
        store: Arc<dyn ResourceStore>,
        connector: Arc<dyn Connector>,
        node_id: Arc<dyn NodeIdSource>,
    ) -> Self {
        Self {
            config,
            cmdline,
            identity: LinkIdentity::new(),
            store,
            connector,
            node_id,
            state: LinkState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Link identity owned by this controller
    pub fn identity(&self) -> &LinkIdentity {
        &self.identity
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Run the controller to completion
    ///
    /// `events` delivers change notifications for the network status
    /// resource. Setting `shutdown` to `true` ends the run cleanly at any
    /// suspension point. Errors leave the controller in [`LinkState::Failed`].
    pub async fn run(
        &mut self,
        mut events: EventReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<LinkOutcome> {
        self.transition(LinkState::CheckingKernelParam);

        let Some(raw) = self
            .cmdline
            .first(&self.config.kernel_param)
            .map(str::to_string)
        else {
            debug!(param = %self.config.kernel_param, "Kernel parameter absent, link disabled");
            self.transition(LinkState::Done);
            return Ok(LinkOutcome::Disabled);
        };

        match self.run_enabled(&raw, &mut events, &mut shutdown).await {
            Ok(outcome) => {
                if let LinkOutcome::Published(specs) = &outcome {
                    info!(
                        link = %specs.link.name,
                        address = %specs.address.address,
                        "Management link published"
                    );
                }
                self.transition(LinkState::Done);
                Ok(outcome)
            }
            Err(e) => {
                self.transition(LinkState::Failed);
                Err(e)
            }
        }
    }

    async fn run_enabled(
        &mut self,
        raw: &str,
        events: &mut EventReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<LinkOutcome> {
        let node_uuid = self.node_id.node_uuid().await?;
        let public_key = self.identity.ensure_key()?.public_key();

        let descriptor = parse_endpoint(raw).unwrap_or_else(|e| {
            warn!(error = %e, param = %self.config.kernel_param, "Failed to parse link endpoint");
            EndpointDescriptor::default()
        });

        let provisioner = self.connector.connect(&descriptor)?;

        loop {
            self.transition(LinkState::WaitingForTrigger);

            tokio::select! {
                _ = shutdown_requested(shutdown) => {
                    debug!("Shutdown requested while waiting for network");
                    return Ok(LinkOutcome::Cancelled);
                }
                event = events.recv() => {
                    let Some(key) = event else {
                        debug!("Network status event source closed");
                        return Ok(LinkOutcome::Cancelled);
                    };
                    debug!(resource = %key, "Network status changed");
                }
            }

            self.transition(LinkState::AwaitingReadiness);
            if !ReadinessGate::new(self.store.as_ref())
                .address_ready()
                .await?
            {
                continue;
            }

            self.transition(LinkState::Provisioning);
            let request = ProvisionRequest {
                node_uuid: node_uuid.clone(),
                node_public_key: public_key.clone(),
                join_token: descriptor.join_token.clone(),
            };

            let response = tokio::select! {
                _ = shutdown_requested(shutdown) => {
                    debug!("Shutdown requested during provisioning");
                    return Ok(LinkOutcome::Cancelled);
                }
                response = provision(provisioner.as_ref(), request) => response?,
            };

            self.transition(LinkState::Publishing);
            let key = self
                .identity
                .key()
                .ok_or_else(|| LinkError::KeyGeneration("link key missing".into()))?;
            let specs = synthesize(key, &response, &self.config)?;

            tokio::select! {
                _ = shutdown_requested(shutdown) => {
                    debug!("Shutdown requested while publishing");
                    return Ok(LinkOutcome::Cancelled);
                }
                published = self.publish(&specs) => published?,
            }

            return Ok(LinkOutcome::Published(Box::new(specs)));
        }
    }

    async fn publish(&self, specs: &LinkSpecs) -> Result<()> {
        let link = self
            .store
            .upsert(UpsertRequest::replace(
                specs.link_key.clone(),
                ResourceSpec::Link(specs.link.clone()),
            ))
            .await
            .map_err(|source| LinkError::Publish {
                what: "link",
                source,
            })?;
        debug!(resource = %link.key, version = link.version, "Wrote link spec");

        let address = self
            .store
            .upsert(UpsertRequest::replace(
                specs.address_key.clone(),
                ResourceSpec::Address(specs.address.clone()),
            ))
            .await
            .map_err(|source| LinkError::Publish {
                what: "address",
                source,
            })?;
        debug!(resource = %address.key, version = address.version, "Wrote address spec");

        Ok(())
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Link controller state change");
            self.state = next;
        }
    }
}

async fn provision(
    provisioner: &dyn Provisioner,
    request: ProvisionRequest,
) -> Result<ProvisionResponse> {
    debug!(node_uuid = %request.node_uuid, "Requesting link parameters");
    provisioner.provision(request).await
}

/// Resolves once shutdown is requested; never resolves if the sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

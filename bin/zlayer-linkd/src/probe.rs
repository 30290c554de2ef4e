//! Network readiness probe
//!
//! Publishes the network status resource from the addresses the kernel
//! reports, until shutdown.

use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};
use zlayer_link::{MemoryStore, NetworkStatusSpec, ResourceKey, ResourceSpec};

/// Whether `ip -o addr show scope global` output lists a usable address
///
/// Addresses on loopback and on the management link itself do not count,
/// nor do addresses still in duplicate address detection.
pub(crate) fn has_global_address(output: &str, link_name: &str) -> bool {
    output.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let (Some(_index), Some(ifname), Some(family)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return false;
        };

        let ifname = ifname.trim_end_matches(':');
        let ifname = ifname.split('@').next().unwrap_or(ifname);

        matches!(family, "inet" | "inet6")
            && ifname != "lo"
            && ifname != link_name
            && !line.contains("tentative")
    })
}

/// Sample the current network status
pub(crate) async fn sample(link_name: &str) -> NetworkStatusSpec {
    let output = match Command::new("ip")
        .args(["-o", "addr", "show", "scope", "global"])
        .output()
        .await
    {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            debug!(status = %output.status, "ip addr exited unsuccessfully");
            return NetworkStatusSpec::default();
        }
        Err(e) => {
            debug!(error = %e, "Failed to run ip addr");
            return NetworkStatusSpec::default();
        }
    };

    let ready = has_global_address(&String::from_utf8_lossy(&output.stdout), link_name);
    NetworkStatusSpec {
        address_ready: ready,
        connectivity_ready: ready,
        ..NetworkStatusSpec::default()
    }
}

/// Store one status sample; the store only notifies watchers on change
pub(crate) async fn publish(store: &MemoryStore, status: NetworkStatusSpec) {
    if let Err(e) = store
        .put(
            ResourceKey::network_status(),
            ResourceSpec::NetworkStatus(status),
        )
        .await
    {
        warn!(error = %e, "Failed to publish network status");
    }
}

/// Sample and publish every `interval` until shutdown
pub(crate) async fn run(
    store: MemoryStore,
    link_name: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Network probe stopped");
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {
                publish(&store, sample(&link_name).await).await;
            }
        }
    }
}

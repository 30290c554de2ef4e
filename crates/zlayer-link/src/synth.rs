//! Translation of a provisioning response into link and address specs

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::identity::KeyPair;
use crate::provision::ProvisionResponse;
use crate::resource::{
    address_id, layered_id, link_id, AddressFamily, AddressFlags, AddressScope, AddressSpec,
    ConfigLayer, LinkSpec, LinkType, ResourceKey, ResourceKind, WireguardPeer, WireguardSpec,
    NETWORK_CONFIG_NAMESPACE, WIREGUARD_KIND,
};
use ipnet::IpNet;
use std::net::IpAddr;

/// Layer the management link specs are published under
pub const LINK_CONFIG_LAYER: ConfigLayer = ConfigLayer::Operator;

/// Specs describing the management link, ready to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpecs {
    pub link_key: ResourceKey,
    pub link: LinkSpec,
    pub address_key: ResourceKey,
    pub address: AddressSpec,
}

/// Build the WireGuard link and its address from a provisioning response
///
/// The tunnel has a single peer, the provisioning server, reachable only at
/// its own address inside the link. The node sends keepalives because the
/// server does not learn the node's endpoint until the first packet.
pub fn synthesize(
    identity: &KeyPair,
    response: &ProvisionResponse,
    config: &LinkConfig,
) -> Result<LinkSpecs> {
    let server_address: IpAddr =
        response
            .server_address
            .parse()
            .map_err(|source| LinkError::InvalidServerAddress {
                value: response.server_address.clone(),
                source,
            })?;

    let node_address: IpNet =
        response
            .node_address_prefix
            .parse()
            .map_err(|source| LinkError::InvalidNodePrefix {
                value: response.node_address_prefix.clone(),
                source,
            })?;

    let mut wireguard = WireguardSpec {
        private_key: identity.private_key(),
        listen_port: 0,
        firewall_mark: 0,
        peers: vec![WireguardPeer {
            public_key: response.server_public_key.clone(),
            preshared_key: String::new(),
            endpoint: response.server_endpoint.clone(),
            persistent_keepalive_interval: config.keepalive,
            allowed_ips: vec![IpNet::from(server_address)],
        }],
    };
    wireguard.sort();

    let link = LinkSpec {
        name: config.link_name.clone(),
        logical: true,
        up: true,
        kind: WIREGUARD_KIND.to_string(),
        link_type: LinkType::None,
        config_layer: LINK_CONFIG_LAYER,
        wireguard,
    };

    let address = AddressSpec {
        address: node_address,
        link_name: config.link_name.clone(),
        family: AddressFamily::Inet6,
        scope: AddressScope::Global,
        flags: AddressFlags::PERMANENT,
        config_layer: LINK_CONFIG_LAYER,
    };

    Ok(LinkSpecs {
        link_key: ResourceKey::new(
            NETWORK_CONFIG_NAMESPACE,
            ResourceKind::LinkSpec,
            layered_id(LINK_CONFIG_LAYER, &link_id(&config.link_name)),
        ),
        link,
        address_key: ResourceKey::new(
            NETWORK_CONFIG_NAMESPACE,
            ResourceKind::AddressSpec,
            layered_id(
                LINK_CONFIG_LAYER,
                &address_id(&config.link_name, &node_address),
            ),
        ),
        address,
    })
}

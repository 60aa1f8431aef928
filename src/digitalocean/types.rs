//! Wire types for the DigitalOcean v2 droplets API.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::provider::InstanceSpec;

/// Page size used when listing droplets.
pub(crate) const PER_PAGE: usize = 200;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct Droplet {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) networks: Networks,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub(crate) struct Networks {
    #[serde(default)]
    pub(crate) v4: Vec<NetworkV4>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct NetworkV4 {
    pub(crate) ip_address: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
}

impl Droplet {
    /// Returns the first public IPv4 address, once the provider assigns one.
    pub(crate) fn public_v4(&self) -> Option<IpAddr> {
        self.networks
            .v4
            .iter()
            .filter(|net| net.kind == "public")
            .find_map(|net| net.ip_address.parse().ok())
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct DropletEnvelope {
    pub(crate) droplet: Droplet,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct DropletListPage {
    #[serde(default)]
    pub(crate) droplets: Vec<Droplet>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct CreateDropletBody {
    pub(crate) name: String,
    pub(crate) region: String,
    pub(crate) image: String,
    pub(crate) size: String,
    pub(crate) ssh_keys: Vec<u64>,
    pub(crate) ipv6: bool,
    pub(crate) private_networking: bool,
    pub(crate) backups: bool,
}

impl From<&InstanceSpec> for CreateDropletBody {
    fn from(spec: &InstanceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            region: spec.region.clone(),
            image: spec.image.clone(),
            size: spec.size.clone(),
            ssh_keys: spec.ssh_keys.clone(),
            ipv6: spec.ipv6,
            private_networking: spec.private_networking,
            backups: spec.backups,
        }
    }
}

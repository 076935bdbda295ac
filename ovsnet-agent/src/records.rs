//! Records exchanged through the state store.
//!
//! Desired records (`/ovsnet/config/...`) are written by the control plane and
//! only ever read here. Oper records (`/ovsnet/oper/{host}/...`) belong to the
//! agent running on `host`.

use ovsnet_state::StateRecord;
use serde::{Deserialize, Serialize};

pub const CONFIG_PREFIX: &str = "/ovsnet/config/";
pub const OPER_PREFIX: &str = "/ovsnet/oper/";

/// Highest id usable as an OVS port tag.
const MAX_PORT_VLAN: u32 = 4094;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PktTagType {
    #[default]
    Vlan,
    Vxlan,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub id: String,
    pub tenant: String,
    pub pkt_tag_type: PktTagType,
    /// Host local VLAN carrying the network's traffic on the bridge.
    pub pkt_tag: u32,
    /// VXLAN network identifier for `vxlan` networks.
    pub ext_pkt_tag: u32,
}

impl NetworkConfig {
    pub fn key_for(id: &str) -> String {
        format!("{CONFIG_PREFIX}networks/{id}")
    }
}

impl StateRecord for NetworkConfig {
    fn key(&self) -> String {
        Self::key_for(&self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointGroupConfig {
    pub id: String,
    pub net_id: String,
    pub pkt_tag_type: PktTagType,
    pub pkt_tag: u32,
}

impl EndpointGroupConfig {
    pub fn key_for(id: &str) -> String {
        format!("{CONFIG_PREFIX}endpoint-groups/{id}")
    }
}

impl StateRecord for EndpointGroupConfig {
    fn key(&self) -> String {
        Self::key_for(&self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub id: String,
    pub net_id: String,
    pub endpoint_group_id: String,
    pub mac_address: String,
    pub ip_address: String,
    pub attach_uuid: String,
    pub cont_name: String,
    pub service_name: String,
    pub intf_name: String,
    pub homing_host: String,
    /// Set when the endpoint lives on another host.
    pub vtep_ip: String,
}

impl EndpointConfig {
    pub const PREFIX: &str = "/ovsnet/config/endpoints/";

    pub fn key_for(id: &str) -> String {
        format!("{}{id}", Self::PREFIX)
    }

    /// Endpoint id a desired record is stored under.
    pub fn id_from_key(key: &str) -> Option<&str> {
        key.strip_prefix(Self::PREFIX).filter(|id| !id.is_empty())
    }

    pub fn is_remote(&self) -> bool {
        !self.vtep_ip.is_empty()
    }
}

impl StateRecord for EndpointConfig {
    fn key(&self) -> String {
        Self::key_for(&self.id)
    }
}

/// What the agent on `host` realized for one endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOperState {
    pub id: String,
    pub host: String,
    pub net_id: String,
    pub attach_uuid: String,
    pub cont_name: String,
    pub service_name: String,
    pub ip_address: String,
    pub mac_address: String,
    pub intf_name: String,
    /// Local interface backing the endpoint, empty for remote endpoints.
    pub port_name: String,
    pub homing_host: String,
    pub vtep_ip: String,
}

impl EndpointOperState {
    pub fn key_for(host: &str, id: &str) -> String {
        format!("{}{id}", Self::prefix(host))
    }

    pub fn prefix(host: &str) -> String {
        format!("{OPER_PREFIX}{host}/endpoints/")
    }

    /// Oper record for endpoint `id` as requested by the caller. The id inside
    /// the desired body is not trusted to match its key.
    pub fn realized(host: &str, id: &str, cfg: &EndpointConfig, port_name: &str) -> Self {
        Self {
            id: id.to_owned(),
            host: host.to_owned(),
            net_id: cfg.net_id.clone(),
            attach_uuid: cfg.attach_uuid.clone(),
            cont_name: cfg.cont_name.clone(),
            service_name: cfg.service_name.clone(),
            ip_address: cfg.ip_address.clone(),
            mac_address: cfg.mac_address.clone(),
            intf_name: cfg.intf_name.clone(),
            port_name: port_name.to_owned(),
            homing_host: cfg.homing_host.clone(),
            vtep_ip: cfg.vtep_ip.clone(),
        }
    }

    /// Compares the identity fields of the desired endpoint. Labels such as
    /// the container or service name may change without replumbing the port.
    pub fn matches(&self, cfg: &EndpointConfig) -> bool {
        self.net_id == cfg.net_id
            && self.ip_address == cfg.ip_address
            && self.mac_address == cfg.mac_address
            && self.attach_uuid == cfg.attach_uuid
            && self.homing_host == cfg.homing_host
            && self.vtep_ip == cfg.vtep_ip
            && self.intf_name == cfg.intf_name
    }

    pub fn is_remote(&self) -> bool {
        !self.vtep_ip.is_empty()
    }
}

impl StateRecord for EndpointOperState {
    fn key(&self) -> String {
        Self::key_for(&self.host, &self.id)
    }
}

/// Per host counter behind local interface names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverOperState {
    pub host: String,
    pub curr_port_num: u64,
}

impl DriverOperState {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_owned(),
            curr_port_num: 0,
        }
    }

    pub fn key_for(host: &str) -> String {
        format!("{OPER_PREFIX}{host}/driver")
    }
}

impl StateRecord for DriverOperState {
    fn key(&self) -> String {
        Self::key_for(&self.host)
    }
}

/// Tag an endpoint's traffic is carried with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketTag {
    pub tag_type: PktTagType,
    pub tag: u32,
}

impl PacketTag {
    /// Uses the group's tag, or the network's when the group has none.
    pub fn resolve(network: &NetworkConfig, group: Option<&EndpointGroupConfig>) -> Self {
        match group {
            Some(group) if group.pkt_tag != 0 => Self {
                tag_type: group.pkt_tag_type,
                tag: group.pkt_tag,
            },
            _ => Self {
                tag_type: network.pkt_tag_type,
                tag: network.pkt_tag,
            },
        }
    }

    pub fn port_vlan(&self) -> Option<u16> {
        if self.tag == 0 || self.tag > MAX_PORT_VLAN {
            return None;
        }
        u16::try_from(self.tag).ok()
    }
}

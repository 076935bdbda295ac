//! Allocation of scarce shared network values (VLAN ids, VXLAN ids, subnet
//! blocks) persisted in the replicated store.

pub mod allocator;
pub mod pool;
pub mod registry;

use std::fmt::Display;
use std::str::FromStr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use allocator::ResourceAllocator;
pub use pool::ResourcePool;
pub use registry::{PoolConstructor, ResourceRegistry};

pub const RESOURCES_PREFIX: &str = "/ovsnet/resources/";

#[derive(Error, Debug)]
pub enum Error {
    #[error("no resource type registered for descriptor {0}")]
    UnknownResourceType(String),

    #[error("resource {kind}/{id} already exists")]
    AlreadyExists { kind: ResourceKind, id: String },

    #[error("resource {kind}/{id} not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("resource {0} has no free value left")]
    ResourceExhausted(String),

    #[error("value {value} is not held by resource {id}")]
    InvalidValue { id: String, value: String },

    #[error("invalid resource config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    State(#[from] ovsnet_state::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::State(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::State(e) if e.is_transient())
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::UnknownResourceType(_) => "unknown_resource_type",
            Error::AlreadyExists { .. } => "already_exists",
            Error::NotFound { .. } => "not_found",
            Error::ResourceExhausted(_) => "resource_exhausted",
            Error::InvalidValue { .. } => "invalid_value",
            Error::InvalidConfig(_) => "invalid_config",
            Error::State(e) => e.metric_label(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Type descriptor of a resource variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    AutoVlans,
    AutoVxlans,
    AutoSubnets,
}

impl ResourceKind {
    pub fn descriptor(&self) -> &'static str {
        match self {
            ResourceKind::AutoVlans => "auto-vlans",
            ResourceKind::AutoVxlans => "auto-vxlans",
            ResourceKind::AutoSubnets => "auto-subnets",
        }
    }

    /// Store prefix holding every instance of this variant.
    pub fn prefix(&self) -> String {
        format!("{RESOURCES_PREFIX}{}/", self.descriptor())
    }

    pub fn key_for(&self, id: &str) -> String {
        format!("{}{id}", self.prefix())
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.descriptor())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto-vlans" => Ok(ResourceKind::AutoVlans),
            "auto-vxlans" => Ok(ResourceKind::AutoVxlans),
            "auto-subnets" => Ok(ResourceKind::AutoSubnets),
            other => Err(Error::UnknownResourceType(other.into())),
        }
    }
}

/// A value handed out by a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceValue {
    Id(u32),
    Subnet(Ipv4Network),
}

impl Display for ResourceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceValue::Id(id) => write!(f, "{id}"),
            ResourceValue::Subnet(net) => write!(f, "{net}"),
        }
    }
}

impl FromStr for ResourceValue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.contains('/') {
            let net = s
                .parse::<Ipv4Network>()
                .map_err(|e| Error::InvalidConfig(format!("{s}: {e}")))?;
            return Ok(ResourceValue::Subnet(net));
        }
        let id = s
            .parse::<u32>()
            .map_err(|e| Error::InvalidConfig(format!("{s}: {e}")))?;
        Ok(ResourceValue::Id(id))
    }
}

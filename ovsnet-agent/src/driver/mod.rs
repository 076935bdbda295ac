mod port;
mod vport;

use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Result;
use crate::records::EndpointOperState;

pub use port::Dataplane;
pub use vport::VportDriver;

/// How an endpoint port is built on the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PortMode {
    /// A veth pair; the `v` prefixed end is attached to the bridge.
    #[default]
    Veth,
    /// A single OVS internal interface.
    Internal,
}

#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub host_label: String,
    pub port_mode: PortMode,
    pub base_mtu: u32,
    /// Bytes of VXLAN encapsulation (inner ethernet, outer IP, UDP and VXLAN
    /// headers) reserved below the base MTU.
    pub encap_overhead: u32,
    /// Time granted to the OS to materialize a new device.
    pub link_settle: Duration,
    pub max_intf_retry: usize,
}

impl DriverConfig {
    pub fn new(host_label: impl Into<String>) -> Self {
        Self {
            host_label: host_label.into(),
            port_mode: PortMode::Veth,
            base_mtu: 1500,
            encap_overhead: 50,
            link_settle: Duration::from_millis(300),
            max_intf_retry: 10,
        }
    }

    pub fn endpoint_mtu(&self) -> u32 {
        self.base_mtu.saturating_sub(self.encap_overhead)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub host_addr: String,
    pub port: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub protocol: String,
    pub svc_port: u16,
    pub prov_port: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub ip_address: String,
    pub ports: Vec<ServicePort>,
}

/// Capability surface handed to the orchestration shim.
///
/// Peer, master and service hooks belong to drivers that program flows; the
/// defaults accept and log them.
#[async_trait]
pub trait NetworkDriver: Send + Sync {
    /// Restores driver state persisted by a previous run.
    async fn init(&self) -> Result<()>;

    async fn deinit(&self);

    async fn create_network(&self, id: &str) -> Result<()>;

    async fn delete_network(&self, id: &str) -> Result<()>;

    async fn create_endpoint(&self, id: &str) -> Result<()>;

    async fn delete_endpoint(&self, id: &str) -> Result<()>;

    /// Moves the endpoint's container facing interface into the network
    /// namespace of `pid`.
    async fn attach_endpoint(&self, id: &str, pid: i32) -> Result<()>;

    /// Endpoints realized by this host.
    async fn endpoints(&self) -> Result<Vec<EndpointOperState>>;

    async fn add_peer_host(&self, node: &ServiceInfo) -> Result<()> {
        info!(?node, "add peer host");
        Ok(())
    }

    async fn delete_peer_host(&self, node: &ServiceInfo) -> Result<()> {
        info!(?node, "delete peer host");
        Ok(())
    }

    async fn add_master(&self, node: &ServiceInfo) -> Result<()> {
        info!(?node, "add master");
        Ok(())
    }

    async fn delete_master(&self, node: &ServiceInfo) -> Result<()> {
        info!(?node, "delete master");
        Ok(())
    }

    async fn add_svc_spec(&self, name: &str, spec: &ServiceSpec) -> Result<()> {
        info!(%name, ?spec, "add service");
        Ok(())
    }

    async fn del_svc_spec(&self, name: &str, spec: &ServiceSpec) -> Result<()> {
        info!(%name, ?spec, "delete service");
        Ok(())
    }

    async fn svc_provider_update(&self, name: &str, providers: &[String]) {
        info!(%name, ?providers, "update service providers");
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ovsnet_resources::{ResourceKind, ResourceValue};

use crate::driver::{DriverConfig, PortMode};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    /// Run the host agent
    Agent(AgentArgs),
    /// Manage allocatable network resources
    Resource(ResourceArgs),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    #[default]
    Etcd,
    /// Process local, for development only
    Memory,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// State store backend
    #[arg(long, env = "OVSNET_STORE", value_enum, default_value_t = StoreKind::Etcd)]
    pub store: StoreKind,

    /// Comma separated etcd endpoints
    #[arg(
        long,
        env = "ETCD_ENDPOINTS",
        value_delimiter = ',',
        default_value = "http://127.0.0.1:2379"
    )]
    pub etcd_endpoints: Vec<String>,

    /// Timeout applied to every store request
    #[arg(long, default_value_t = 5000)]
    pub store_timeout_ms: u64,
}

impl StoreArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct AgentArgs {
    /// Name of the host the agent is running on
    #[arg(long, env = "HOST_LABEL")]
    pub host_label: String,

    #[command(flatten)]
    pub store: StoreArgs,

    /// How endpoint ports are built
    #[arg(long, value_enum, default_value_t = PortMode::Veth)]
    pub port_mode: PortMode,

    /// OVS bridge endpoint ports are attached to
    #[arg(long, env = "OVS_BRIDGE", default_value = "ovsbr0")]
    pub ovs_bridge: String,

    /// MTU of the underlay
    #[arg(long, default_value_t = 1500)]
    pub base_mtu: u32,

    /// Bytes reserved for VXLAN encapsulation
    #[arg(long, default_value_t = 50)]
    pub encap_overhead: u32,

    /// Wait for new devices to materialize before configuring them
    #[arg(long, default_value_t = 300)]
    pub link_settle_ms: u64,

    /// Interface names probed before giving up
    #[arg(long, default_value_t = 10)]
    pub max_intf_retry: usize,

    /// Metrics listener for agent
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,

    /// Agent socket path
    #[arg(
        long,
        env = "AGENT_SOCKET_PATH",
        default_value = "/var/run/ovsnet/ovsnet.sock"
    )]
    pub agent_socket_path: PathBuf,

    /// Seconds between host resyncs, 0 disables them
    #[arg(long, default_value_t = 30)]
    pub resync_interval_secs: u64,
}

impl AgentArgs {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            host_label: self.host_label.clone(),
            port_mode: self.port_mode,
            base_mtu: self.base_mtu,
            encap_overhead: self.encap_overhead,
            link_settle: Duration::from_millis(self.link_settle_ms),
            max_intf_retry: self.max_intf_retry,
        }
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ResourceArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: ResourceCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ResourceCommand {
    /// Create a resource instance
    Define {
        id: String,
        /// auto-vlans, auto-vxlans or auto-subnets
        kind: ResourceKind,
        /// Range of the instance as JSON
        #[arg(long)]
        config: String,
    },
    /// Remove a resource instance
    Undefine { id: String, kind: ResourceKind },
    /// Take the lowest free value
    Allocate { id: String, kind: ResourceKind },
    /// Return a value
    Deallocate {
        id: String,
        kind: ResourceKind,
        value: ResourceValue,
    },
    /// Print the held values of an instance
    Show { id: String, kind: ResourceKind },
}

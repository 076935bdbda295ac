use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::Result;
use crate::driver::{DriverConfig, PortMode};
use crate::netlink::Netlink;
use crate::switch::{PortKind, PortSwitch};

/// Builds and removes endpoint ports. Every call blocks on OS primitives and
/// is meant to run on a blocking thread.
#[derive(Clone)]
pub struct Dataplane {
    netlink: Arc<dyn Netlink>,
    switch: Arc<dyn PortSwitch>,
    mode: PortMode,
    mtu: u32,
    settle: Duration,
}

impl Dataplane {
    pub fn new(
        config: &DriverConfig,
        netlink: Arc<dyn Netlink>,
        switch: Arc<dyn PortSwitch>,
    ) -> Self {
        Self {
            netlink,
            switch,
            mode: config.port_mode,
            mtu: config.endpoint_mtu(),
            settle: config.link_settle,
        }
    }

    pub fn netlink(&self) -> &dyn Netlink {
        self.netlink.as_ref()
    }

    /// Name of the port attached to the bridge for the container facing
    /// interface `intf`.
    pub fn ovs_port_name(&self, intf: &str) -> String {
        match self.mode {
            PortMode::Veth => format!("v{intf}"),
            PortMode::Internal => intf.to_owned(),
        }
    }

    /// Creates the port and configures it. Anything created before a failing
    /// step is removed again before the error is returned.
    pub fn build_port(&self, intf: &str, mac: &str, tag: Option<u16>) -> Result<()> {
        let ovs_port = self.ovs_port_name(intf);
        match self.mode {
            PortMode::Veth => self.netlink.create_veth_pair(intf, &ovs_port)?,
            PortMode::Internal => self.switch.add_port(intf, PortKind::Internal, tag)?,
        }

        if let Err(e) = self.configure(intf, &ovs_port, mac, tag) {
            error!(%intf, %ovs_port, %e, "failed to configure port, rolling back");
            if let Err(rollback) = self.remove_port(intf) {
                error!(%intf, %rollback, "rollback of port failed");
            }
            return Err(e);
        }
        info!(%intf, %ovs_port, mtu = self.mtu, ?tag, "port created");
        Ok(())
    }

    fn configure(&self, intf: &str, ovs_port: &str, mac: &str, tag: Option<u16>) -> Result<()> {
        if self.mode == PortMode::Veth {
            self.switch.add_port(ovs_port, PortKind::System, tag)?;
        }
        std::thread::sleep(self.settle);
        self.netlink.set_link_mtu(intf, self.mtu)?;
        self.netlink.set_link_up(ovs_port)?;
        self.netlink.set_interface_mac(intf, mac)?;
        Ok(())
    }

    /// Detaches the port from the bridge and deletes its devices. A failed
    /// switch update does not stop the veth pair from being deleted.
    pub fn remove_port(&self, intf: &str) -> Result<()> {
        let ovs_port = self.ovs_port_name(intf);
        let detached = self.switch.delete_port(&ovs_port);
        if let Err(e) = &detached {
            warn!(%ovs_port, %e, "failed to delete port from ovs");
        }
        match self.mode {
            PortMode::Veth => self
                .netlink
                .delete_veth_pair(&ovs_port, intf)
                .and(detached),
            PortMode::Internal => detached,
        }
    }
}

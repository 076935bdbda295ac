use std::process::Command;

use nix::errno::Errno;
use nix::net::if_::if_nametoindex;
use tracing::{debug, info};

use crate::netlink::Netlink;
use crate::{Error, Result};

/// [`Netlink`] driving the kernel through the iproute2 `ip` tool. Lookups go
/// straight to `if_nametoindex`.
#[derive(Clone, Debug, Default)]
pub struct IpRoute2 {
    _private: (),
}

impl IpRoute2 {
    /// Checks that `ip` can be executed on this host.
    pub fn probe() -> Result<Self> {
        let output = Command::new("ip").arg("-V").output().map_err(|e| {
            Error::UnsupportedPlatform(format!("link management without iproute2 ({e})"))
        })?;
        if !output.status.success() {
            return Err(Error::UnsupportedPlatform(
                "link management without a working iproute2".into(),
            ));
        }
        info!(
            "using {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(Self { _private: () })
    }

    fn ip(&self, op: &'static str, name: &str, args: &[&str]) -> Result<()> {
        debug!("ip {}", args.join(" "));
        let output = Command::new("ip")
            .args(args)
            .output()
            .map_err(|e| Error::Platform {
                op,
                name: name.to_owned(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::Platform {
                op,
                name: name.to_owned(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

impl Netlink for IpRoute2 {
    fn link_exists(&self, name: &str) -> Result<bool> {
        match if_nametoindex(name) {
            Ok(_) => Ok(true),
            Err(Errno::ENODEV) => Ok(false),
            Err(e) => Err(Error::Platform {
                op: "lookup link",
                name: name.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()> {
        info!(%name, %peer, "creating veth pair");
        self.ip(
            "create veth pair",
            name,
            &["link", "add", name, "type", "veth", "peer", "name", peer],
        )
    }

    fn delete_veth_pair(&self, name: &str, peer: &str) -> Result<()> {
        info!(%name, %peer, "deleting veth pair");
        self.ip("delete veth pair", name, &["link", "del", "dev", name])
    }

    fn set_link_up(&self, name: &str) -> Result<()> {
        self.ip("set link up", name, &["link", "set", "dev", name, "up"])
    }

    fn set_link_mtu(&self, name: &str, mtu: u32) -> Result<()> {
        let mtu = mtu.to_string();
        self.ip("set mtu", name, &["link", "set", "dev", name, "mtu", &mtu])
    }

    fn set_interface_mac(&self, name: &str, mac: &str) -> Result<()> {
        self.ip(
            "set mac",
            name,
            &["link", "set", "dev", name, "address", mac],
        )
    }

    fn set_link_netns(&self, name: &str, pid: i32) -> Result<()> {
        let pid = pid.to_string();
        self.ip(
            "move link",
            name,
            &["link", "set", "dev", name, "netns", &pid],
        )
    }
}

use std::process::Command;

use tracing::{debug, info};

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortKind {
    /// An existing kernel device, such as the bridge end of a veth pair.
    System,
    /// A device created by the switch itself.
    Internal,
}

/// Attaches endpoint ports to the host's virtual switch.
pub trait PortSwitch: Send + Sync {
    fn add_port(&self, name: &str, kind: PortKind, tag: Option<u16>) -> Result<()>;

    /// Deleting a port the switch does not know is not an error.
    fn delete_port(&self, name: &str) -> Result<()>;
}

/// [`PortSwitch`] for an Open vSwitch bridge, driven through `ovs-vsctl`.
#[derive(Clone, Debug)]
pub struct OvsVsctl {
    bridge: String,
}

impl OvsVsctl {
    /// Checks that `ovs-vsctl` runs and that `bridge` exists.
    pub fn probe(bridge: &str) -> Result<Self> {
        let status = Command::new("ovs-vsctl")
            .args(["br-exists", bridge])
            .status()
            .map_err(|e| Error::UnsupportedPlatform(format!("open vswitch ({e})")))?;
        if !status.success() {
            return Err(Error::Config(format!("ovs bridge {bridge} does not exist")));
        }
        info!(%bridge, "attaching endpoint ports to ovs bridge");
        Ok(Self {
            bridge: bridge.to_owned(),
        })
    }

    fn vsctl(&self, op: &'static str, name: &str, args: Vec<String>) -> Result<()> {
        debug!("ovs-vsctl {}", args.join(" "));
        let output = Command::new("ovs-vsctl")
            .args(&args)
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

fn add_port_args(bridge: &str, name: &str, kind: PortKind, tag: Option<u16>) -> Vec<String> {
    let mut args = vec![
        "--may-exist".to_owned(),
        "add-port".to_owned(),
        bridge.to_owned(),
        name.to_owned(),
    ];
    // an existing port keeps its row, so the tag is always rewritten
    match tag {
        Some(tag) => args.extend([
            "--".to_owned(),
            "set".to_owned(),
            "port".to_owned(),
            name.to_owned(),
            format!("tag={tag}"),
        ]),
        None => args.extend([
            "--".to_owned(),
            "clear".to_owned(),
            "port".to_owned(),
            name.to_owned(),
            "tag".to_owned(),
        ]),
    }
    if kind == PortKind::Internal {
        args.extend([
            "--".to_owned(),
            "set".to_owned(),
            "interface".to_owned(),
            name.to_owned(),
            "type=internal".to_owned(),
        ]);
    }
    args
}

fn delete_port_args(bridge: &str, name: &str) -> Vec<String> {
    vec![
        "--if-exists".to_owned(),
        "del-port".to_owned(),
        bridge.to_owned(),
        name.to_owned(),
    ]
}

impl PortSwitch for OvsVsctl {
    fn add_port(&self, name: &str, kind: PortKind, tag: Option<u16>) -> Result<()> {
        self.vsctl(
            "add ovs port",
            name,
            add_port_args(&self.bridge, name, kind, tag),
        )
    }

    fn delete_port(&self, name: &str) -> Result<()> {
        self.vsctl("delete ovs port", name, delete_port_args(&self.bridge, name))
    }
}

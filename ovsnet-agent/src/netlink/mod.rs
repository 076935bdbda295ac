#[cfg(target_os = "linux")]
mod linux;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::{Error, Result};

#[cfg(target_os = "linux")]
pub use linux::IpRoute2;

/// Wait before looking a link up a second time when moving it into a
/// namespace.
pub const LINK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Blocking OS link primitives used to build endpoint ports.
pub trait Netlink: Send + Sync {
    fn link_exists(&self, name: &str) -> Result<bool>;

    /// Creates `name` with `peer` as the other end.
    fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()>;

    /// Deletes the pair through `name`; the kernel removes `peer` with it.
    fn delete_veth_pair(&self, name: &str, peer: &str) -> Result<()>;

    fn set_link_up(&self, name: &str) -> Result<()>;

    fn set_link_mtu(&self, name: &str, mtu: u32) -> Result<()>;

    fn set_interface_mac(&self, name: &str, mac: &str) -> Result<()>;

    /// Moves an existing link into the network namespace of `pid`.
    fn set_link_netns(&self, name: &str, pid: i32) -> Result<()>;

    fn link_retry_delay(&self) -> Duration {
        LINK_RETRY_DELAY
    }

    /// A freshly created device may not be visible yet, so a missing link is
    /// looked up exactly once more after [`Netlink::link_retry_delay`].
    fn move_link_to_namespace(&self, name: &str, pid: i32) -> Result<()> {
        if !self.link_exists(name)? {
            debug!(%name, "link not visible yet, retrying once");
            std::thread::sleep(self.link_retry_delay());
            if !self.link_exists(name)? {
                error!(%name, pid, "unable to find link");
                return Err(Error::Platform {
                    op: "move link",
                    name: name.to_owned(),
                    reason: "link not found".into(),
                });
            }
        }
        self.set_link_netns(name, pid)
    }
}

/// Link primitives of the running host. Fails on platforms without them
/// instead of handing out an adapter that breaks mid operation.
pub fn host_netlink() -> Result<Arc<dyn Netlink>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(IpRoute2::probe()?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(Error::UnsupportedPlatform("link management".into()))
    }
}

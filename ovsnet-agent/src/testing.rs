//! Recording fakes for the OS and driver seams.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::driver::NetworkDriver;
use crate::netlink::Netlink;
use crate::records::EndpointOperState;
use crate::switch::{PortKind, PortSwitch};
use crate::{Error, Result};

fn injected(op: &'static str, name: &str) -> Error {
    Error::Platform {
        op,
        name: name.to_owned(),
        reason: "injected failure".into(),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct FakeLink {
    pub mtu: Option<u32>,
    pub mac: Option<String>,
    pub up: bool,
}

#[derive(Default)]
struct Links {
    links: ahash::HashMap<String, FakeLink>,
    calls: Vec<String>,
    failures: ahash::HashSet<&'static str>,
    lookups: ahash::HashMap<String, usize>,
    hidden: ahash::HashMap<String, usize>,
}

/// In-memory link table recording every mutating call as a short string such
/// as `"mtu vport1 1450"`.
#[derive(Default)]
pub(crate) struct FakeNetlink {
    inner: Mutex<Links>,
}

impl FakeNetlink {
    pub fn with_links<'a>(self, names: impl IntoIterator<Item = &'a str>) -> Self {
        {
            let mut inner = self.lock();
            for name in names {
                inner.links.insert(name.to_owned(), FakeLink::default());
            }
        }
        self
    }

    /// Makes every call of `op` (`veth`, `delete`, `up`, `mtu`, `mac`,
    /// `netns`) fail.
    pub fn fail_on(&self, op: &'static str) {
        self.lock().failures.insert(op);
    }

    /// `name` shows up only after `misses` lookups came back empty.
    pub fn appear_after_lookups(&self, name: &str, misses: usize) {
        self.lock().hidden.insert(name.to_owned(), misses);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn lookups(&self, name: &str) -> usize {
        self.lock().lookups.get(name).copied().unwrap_or_default()
    }

    pub fn has_link(&self, name: &str) -> bool {
        self.lock().links.contains_key(name)
    }

    pub fn link(&self, name: &str) -> Option<FakeLink> {
        self.lock().links.get(name).cloned()
    }

    pub fn mtu(&self, name: &str) -> Option<u32> {
        self.link(name).and_then(|link| link.mtu)
    }

    fn lock(&self) -> MutexGuard<'_, Links> {
        self.inner.lock().unwrap()
    }

    fn record(&self, op: &'static str, name: &str, call: String) -> Result<MutexGuard<'_, Links>> {
        let mut inner = self.lock();
        inner.calls.push(call);
        if inner.failures.contains(op) {
            return Err(injected(op, name));
        }
        Ok(inner)
    }
}

impl Netlink for FakeNetlink {
    fn link_exists(&self, name: &str) -> Result<bool> {
        let mut inner = self.lock();
        *inner.lookups.entry(name.to_owned()).or_default() += 1;
        if let Some(misses) = inner.hidden.get_mut(name) {
            if *misses > 0 {
                *misses -= 1;
                return Ok(false);
            }
            inner.hidden.remove(name);
            inner.links.insert(name.to_owned(), FakeLink::default());
        }
        Ok(inner.links.contains_key(name))
    }

    fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()> {
        let mut inner = self.record("veth", name, format!("veth {name} {peer}"))?;
        if inner.links.contains_key(name) || inner.links.contains_key(peer) {
            return Err(Error::Platform {
                op: "veth",
                name: name.to_owned(),
                reason: "file exists".into(),
            });
        }
        inner.links.insert(name.to_owned(), FakeLink::default());
        inner.links.insert(peer.to_owned(), FakeLink::default());
        Ok(())
    }

    fn delete_veth_pair(&self, name: &str, peer: &str) -> Result<()> {
        let mut inner = self.record("delete", name, format!("delete {name}"))?;
        if inner.links.remove(name).is_none() {
            return Err(Error::Platform {
                op: "delete",
                name: name.to_owned(),
                reason: "link not found".into(),
            });
        }
        inner.links.remove(peer);
        Ok(())
    }

    fn set_link_up(&self, name: &str) -> Result<()> {
        let mut inner = self.record("up", name, format!("up {name}"))?;
        inner.links.entry(name.to_owned()).or_default().up = true;
        Ok(())
    }

    fn set_link_mtu(&self, name: &str, mtu: u32) -> Result<()> {
        let mut inner = self.record("mtu", name, format!("mtu {name} {mtu}"))?;
        inner.links.entry(name.to_owned()).or_default().mtu = Some(mtu);
        Ok(())
    }

    fn set_interface_mac(&self, name: &str, mac: &str) -> Result<()> {
        let mut inner = self.record("mac", name, format!("mac {name} {mac}"))?;
        inner.links.entry(name.to_owned()).or_default().mac = Some(mac.to_owned());
        Ok(())
    }

    fn set_link_netns(&self, name: &str, pid: i32) -> Result<()> {
        let mut inner = self.record("netns", name, format!("netns {name} {pid}"))?;
        inner.links.remove(name);
        Ok(())
    }

    fn link_retry_delay(&self) -> Duration {
        Duration::ZERO
    }
}

#[derive(Default)]
struct Ports {
    calls: Vec<String>,
    fail_adds: bool,
    fail_deletes: bool,
}

/// Records switch calls as `"add vvport1 System 10"` or `"del vvport1"`.
#[derive(Default)]
pub(crate) struct FakeSwitch {
    inner: Mutex<Ports>,
}

impl FakeSwitch {
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn fail_adds(&self) {
        self.inner.lock().unwrap().fail_adds = true;
    }

    pub fn fail_deletes(&self) {
        self.inner.lock().unwrap().fail_deletes = true;
    }
}

impl PortSwitch for FakeSwitch {
    fn add_port(&self, name: &str, kind: PortKind, tag: Option<u16>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let tag = tag.map_or_else(|| "-".to_owned(), |t| t.to_string());
        inner.calls.push(format!("add {name} {kind:?} {tag}"));
        if inner.fail_adds {
            return Err(injected("add port", name));
        }
        Ok(())
    }

    fn delete_port(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("del {name}"));
        if inner.fail_deletes {
            return Err(injected("delete port", name));
        }
        Ok(())
    }
}

#[derive(Default)]
struct DriverCalls {
    calls: Vec<String>,
    failing: ahash::HashMap<String, fn() -> Error>,
    endpoints: Vec<EndpointOperState>,
}

/// [`NetworkDriver`] recording calls as `"create ep1"`, `"attach ep1 42"` and
/// so on.
#[derive(Default)]
pub(crate) struct FakeDriver {
    inner: Mutex<DriverCalls>,
}

impl FakeDriver {
    pub fn with_endpoints(self, endpoints: Vec<EndpointOperState>) -> Self {
        self.inner.lock().unwrap().endpoints = endpoints;
        self
    }

    /// Calls on `id` fail with the error built by `err`.
    pub fn fail(&self, id: &str, err: fn() -> Error) {
        self.inner.lock().unwrap().failing.insert(id.to_owned(), err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
        match inner.failing.get(id) {
            Some(err) => Err(err()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NetworkDriver for FakeDriver {
    async fn init(&self) -> Result<()> {
        self.record("init".into(), "")
    }

    async fn deinit(&self) {
        self.inner.lock().unwrap().calls.push("deinit".into());
    }

    async fn create_network(&self, id: &str) -> Result<()> {
        self.record(format!("create network {id}"), id)
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        self.record(format!("delete network {id}"), id)
    }

    async fn create_endpoint(&self, id: &str) -> Result<()> {
        self.record(format!("create {id}"), id)
    }

    async fn delete_endpoint(&self, id: &str) -> Result<()> {
        self.record(format!("delete {id}"), id)
    }

    async fn attach_endpoint(&self, id: &str, pid: i32) -> Result<()> {
        self.record(format!("attach {id} {pid}"), id)
    }

    async fn endpoints(&self) -> Result<Vec<EndpointOperState>> {
        Ok(self.inner.lock().unwrap().endpoints.clone())
    }
}

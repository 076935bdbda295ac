use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ovsnet_state::StateDriver;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::driver::{Dataplane, DriverConfig, NetworkDriver};
use crate::metrics::DriverMetrics;
use crate::netlink::Netlink;
use crate::records::{
    DriverOperState, EndpointConfig, EndpointGroupConfig, EndpointOperState, NetworkConfig,
    PacketTag,
};
use crate::switch::PortSwitch;
use crate::{Error, Result};

/// Reconciles desired endpoints of one host into `vport<N>` ports on an OVS
/// bridge.
///
/// Calls for the same endpoint id are serialized; different ids run
/// concurrently and only meet on the interface name counter.
pub struct VportDriver {
    config: DriverConfig,
    state: StateDriver,
    dataplane: Dataplane,
    oper: Mutex<DriverOperState>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    metrics: DriverMetrics,
}

/// Exclusive hold on one endpoint id. The map entry is dropped with the last
/// holder.
struct EndpointLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    id: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for EndpointLock<'_> {
    fn drop(&mut self) {
        // one reference in the map, one in our guard
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

impl VportDriver {
    pub fn new(
        config: DriverConfig,
        state: StateDriver,
        netlink: Arc<dyn Netlink>,
        switch: Arc<dyn PortSwitch>,
    ) -> Self {
        let dataplane = Dataplane::new(&config, netlink, switch);
        let oper = Mutex::new(DriverOperState::new(&config.host_label));
        Self {
            config,
            state,
            dataplane,
            oper,
            locks: DashMap::new(),
            metrics: DriverMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: DriverMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    async fn lock(&self, id: &str) -> EndpointLock<'_> {
        let lock = self
            .locks
            .entry(id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        EndpointLock {
            locks: &self.locks,
            id: id.to_owned(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Runs blocking port work off the async workers.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Dataplane) -> Result<T> + Send + 'static,
    {
        let dataplane = self.dataplane.clone();
        tokio::task::spawn_blocking(move || f(&dataplane))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    fn oper_key(&self, id: &str) -> String {
        EndpointOperState::key_for(&self.config.host_label, id)
    }

    /// Picks the next `vport<N>` not bound to a live link and persists the
    /// counter before handing the name out.
    async fn allocate_intf_name(&self) -> Result<String> {
        let mut oper = self.oper.lock().await;
        for _ in 0..self.config.max_intf_retry {
            oper.curr_port_num += 1;
            let name = format!("vport{}", oper.curr_port_num);
            let probe = name.clone();
            if self
                .blocking(move |dp| dp.netlink().link_exists(&probe))
                .await?
            {
                debug!(%name, "interface name in use, skipping");
                continue;
            }
            self.state.write(&*oper).await?;
            return Ok(name);
        }
        Err(Error::ResourceExhausted(format!(
            "no free interface name after {} attempts",
            self.config.max_intf_retry
        )))
    }

    async fn create_locked(&self, id: &str) -> Result<()> {
        let cfg: EndpointConfig = self.state.read(&EndpointConfig::key_for(id)).await?;

        let network: NetworkConfig = self
            .state
            .read(&NetworkConfig::key_for(&cfg.net_id))
            .await
            .inspect_err(|e| error!(%id, net_id = %cfg.net_id, %e, "unable to read network"))?;

        let group = if cfg.endpoint_group_id.is_empty() {
            None
        } else {
            match self
                .state
                .read::<EndpointGroupConfig>(&EndpointGroupConfig::key_for(&cfg.endpoint_group_id))
                .await
            {
                Ok(group) => Some(group),
                Err(e) if e.is_not_found() => {
                    info!(%id, group = %cfg.endpoint_group_id, "endpoint group not found, using network tag");
                    None
                }
                Err(e) => return Err(e.into()),
            }
        };
        let tag = PacketTag::resolve(&network, group.as_ref());
        debug!(%id, ?tag, "resolved packet tag");

        match self.state.read::<EndpointOperState>(&self.oper_key(id)).await {
            Ok(oper) if oper.matches(&cfg) => {
                info!(%id, port = %oper.port_name, "found matching oper state, nothing to do");
                return Ok(());
            }
            Ok(oper) => {
                warn!(%id, port = %oper.port_name, "oper state does not match config, cleaning up");
                if let Err(e) = self.delete_locked(id).await {
                    error!(%id, %e, "failed to clean up stale endpoint");
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        if cfg.is_remote() {
            let oper = EndpointOperState::realized(&self.config.host_label, id, &cfg, "");
            self.state.write(&oper).await?;
            info!(%id, vtep = %cfg.vtep_ip, "recorded remote endpoint");
            return Ok(());
        }

        let port = self.allocate_intf_name().await?;
        let (intf, mac) = (port.clone(), cfg.mac_address.clone());
        self.blocking(move |dp| dp.build_port(&intf, &mac, tag.port_vlan()))
            .await
            .inspect_err(|e| error!(%id, %port, %e, "error creating port"))?;

        let oper = EndpointOperState::realized(&self.config.host_label, id, &cfg, &port);
        if let Err(e) = self.state.write(&oper).await {
            error!(%id, %port, %e, "failed to persist oper state, removing port");
            let intf = port.clone();
            if let Err(rollback) = self.blocking(move |dp| dp.remove_port(&intf)).await {
                error!(%id, %port, %rollback, "rollback of port failed");
            }
            return Err(e.into());
        }
        info!(%id, %port, "endpoint created");
        Ok(())
    }

    async fn delete_locked(&self, id: &str) -> Result<()> {
        let key = self.oper_key(id);
        let oper: EndpointOperState = self.state.read(&key).await?;

        let teardown = if oper.is_remote() || oper.port_name.is_empty() {
            Ok(())
        } else {
            let intf = oper.port_name.clone();
            self.blocking(move |dp| dp.remove_port(&intf)).await
        };
        if let Err(e) = &teardown {
            error!(%id, port = %oper.port_name, %e, "error deleting port");
        }

        let cleared = self.state.clear(&key).await;
        teardown?;
        cleared?;
        info!(%id, port = %oper.port_name, "endpoint deleted");
        Ok(())
    }

    async fn attach_locked(&self, id: &str, pid: i32) -> Result<()> {
        let oper: EndpointOperState = self.state.read(&self.oper_key(id)).await?;
        if oper.is_remote() {
            return Err(Error::InvalidEndpoint(format!(
                "{id} is realized behind vtep {}",
                oper.vtep_ip
            )));
        }
        let intf = oper.port_name.clone();
        self.blocking(move |dp| dp.netlink().move_link_to_namespace(&intf, pid))
            .await?;
        info!(%id, port = %oper.port_name, pid, "moved endpoint into namespace");
        Ok(())
    }

    fn observe(&self, operation: &'static str, out: Result<()>) -> Result<()> {
        if let Err(e) = &out {
            self.metrics.count_failure(operation, e);
        }
        out
    }
}

#[async_trait]
impl NetworkDriver for VportDriver {
    async fn init(&self) -> Result<()> {
        let host = &self.config.host_label;
        let restored = match self
            .state
            .read::<DriverOperState>(&DriverOperState::key_for(host))
            .await
        {
            Ok(oper) => oper,
            Err(e) if e.is_not_found() => {
                let fresh = DriverOperState::new(host);
                self.state.write(&fresh).await?;
                fresh
            }
            Err(e) => {
                error!(%host, %e, "failed to read driver oper state");
                return Err(e.into());
            }
        };
        info!(%host, port_num = restored.curr_port_num, "initialized vport driver");
        *self.oper.lock().await = restored;
        Ok(())
    }

    async fn deinit(&self) {
        info!("deinitializing vport driver");
    }

    async fn create_network(&self, id: &str) -> Result<()> {
        info!(%id, "create network");
        Ok(())
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        info!(%id, "delete network");
        Ok(())
    }

    async fn create_endpoint(&self, id: &str) -> Result<()> {
        let _measure = self.metrics.count_and_measure("create_endpoint");
        let _lock = self.lock(id).await;
        info!(%id, "create endpoint");
        let out = self.create_locked(id).await;
        self.observe("create_endpoint", out)
    }

    async fn delete_endpoint(&self, id: &str) -> Result<()> {
        let _measure = self.metrics.count_and_measure("delete_endpoint");
        let _lock = self.lock(id).await;
        info!(%id, "delete endpoint");
        let out = self.delete_locked(id).await;
        self.observe("delete_endpoint", out)
    }

    async fn attach_endpoint(&self, id: &str, pid: i32) -> Result<()> {
        let _measure = self.metrics.count_and_measure("attach_endpoint");
        let _lock = self.lock(id).await;
        let out = self.attach_locked(id, pid).await;
        self.observe("attach_endpoint", out)
    }

    async fn endpoints(&self) -> Result<Vec<EndpointOperState>> {
        Ok(self
            .state
            .read_all(&EndpointOperState::prefix(&self.config.host_label))
            .await?)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use ovsnet_state::{MemoryStore, Revision, StateStore, Versioned};

    use super::*;
    use crate::driver::PortMode;
    use crate::records::PktTagType;
    use crate::testing::{FakeNetlink, FakeSwitch};

    const HOST: &str = "host1";

    /// Memory store refusing writes of endpoint oper records.
    #[derive(Default)]
    struct RejectOperWrites {
        inner: MemoryStore,
    }

    #[async_trait]
    impl StateStore for RejectOperWrites {
        async fn write(&self, key: &str, value: Vec<u8>) -> ovsnet_state::Result<Revision> {
            if key.starts_with(&EndpointOperState::prefix(HOST)) {
                return Err(ovsnet_state::Error::Backend("disk full".into()));
            }
            self.inner.write(key, value).await
        }
        async fn read(&self, key: &str) -> ovsnet_state::Result<Versioned<Vec<u8>>> {
            self.inner.read(key).await
        }
        async fn read_all(&self, prefix: &str) -> ovsnet_state::Result<Vec<Versioned<Vec<u8>>>> {
            self.inner.read_all(prefix).await
        }
        async fn clear(&self, key: &str) -> ovsnet_state::Result<()> {
            self.inner.clear(key).await
        }
        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Revision,
            value: Vec<u8>,
        ) -> ovsnet_state::Result<Revision> {
            self.inner.compare_and_swap(key, expected, value).await
        }
        async fn compare_and_clear(&self, key: &str, expected: Revision) -> ovsnet_state::Result<()> {
            self.inner.compare_and_clear(key, expected).await
        }
    }

    struct Harness {
        state: StateDriver,
        netlink: Arc<FakeNetlink>,
        switch: Arc<FakeSwitch>,
        driver: VportDriver,
    }

    fn harness(mode: PortMode, netlink: FakeNetlink) -> Harness {
        harness_with_store(mode, netlink, Arc::new(MemoryStore::new()))
    }

    fn harness_with_store(
        mode: PortMode,
        netlink: FakeNetlink,
        store: Arc<dyn StateStore>,
    ) -> Harness {
        let state = StateDriver::new(store);
        let netlink = Arc::new(netlink);
        let switch = Arc::new(FakeSwitch::default());
        let config = DriverConfig {
            port_mode: mode,
            link_settle: Duration::ZERO,
            ..DriverConfig::new(HOST)
        };
        let driver = VportDriver::new(config, state.clone(), netlink.clone(), switch.clone());
        Harness {
            state,
            netlink,
            switch,
            driver,
        }
    }

    fn endpoint(id: &str, mac: &str, ip: &str) -> EndpointConfig {
        EndpointConfig {
            id: id.into(),
            net_id: "net1".into(),
            endpoint_group_id: "web".into(),
            mac_address: mac.into(),
            ip_address: ip.into(),
            homing_host: HOST.into(),
            ..Default::default()
        }
    }

    async fn seed(h: &Harness, endpoints: &[EndpointConfig]) -> crate::Result<()> {
        h.state
            .write(&NetworkConfig {
                id: "net1".into(),
                pkt_tag_type: PktTagType::Vlan,
                pkt_tag: 10,
                ..Default::default()
            })
            .await?;
        h.state
            .write(&EndpointGroupConfig {
                id: "web".into(),
                net_id: "net1".into(),
                pkt_tag_type: PktTagType::Vlan,
                pkt_tag: 20,
            })
            .await?;
        for ep in endpoints {
            h.state.write(ep).await?;
        }
        h.driver.init().await
    }

    async fn oper(h: &Harness, id: &str) -> crate::Result<EndpointOperState> {
        Ok(h.state.read(&EndpointOperState::key_for(HOST, id)).await?)
    }

    #[tokio::test]
    async fn test_create_endpoint_realizes_tunnel_safe_mtu() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;

        h.driver.create_endpoint("ep1").await?;

        let realized = oper(&h, "ep1").await?;
        assert_eq!(realized.port_name, "vport1");
        assert_eq!(realized.ip_address, "10.1.0.1");
        assert_eq!(h.netlink.mtu("vport1"), Some(1450));
        assert_eq!(
            h.netlink.link("vport1").and_then(|l| l.mac).as_deref(),
            Some("02:00:00:00:00:01")
        );
        assert_eq!(h.switch.calls(), ["add vvport1 System 20"]);

        let counter: DriverOperState = h.state.read(&DriverOperState::key_for(HOST)).await?;
        assert_eq!(counter.curr_port_num, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_is_idempotent() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;

        h.driver.create_endpoint("ep1").await?;
        let first = oper(&h, "ep1").await?;
        let (netlink_calls, switch_calls) = (h.netlink.calls(), h.switch.calls());

        h.driver.create_endpoint("ep1").await?;
        assert_eq!(h.netlink.calls(), netlink_calls);
        assert_eq!(h.switch.calls(), switch_calls);
        assert_eq!(oper(&h, "ep1").await?, first);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_oper_state_is_rebuilt() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;
        h.driver.create_endpoint("ep1").await?;

        h.state
            .write(&endpoint("ep1", "02:00:00:00:00:09", "10.1.0.9"))
            .await?;
        h.driver.create_endpoint("ep1").await?;

        assert!(h.netlink.calls().contains(&"delete vvport1".to_string()));
        assert!(!h.netlink.has_link("vport1"));
        let rebuilt = oper(&h, "ep1").await?;
        assert_eq!(rebuilt.port_name, "vport2");
        assert_eq!(rebuilt.mac_address, "02:00:00:00:00:09");
        assert_eq!(
            h.netlink.link("vport2").and_then(|l| l.mac).as_deref(),
            Some("02:00:00:00:00:09")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_oper_state_is_keyed_by_requested_id() -> crate::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let h = harness_with_store(PortMode::Veth, FakeNetlink::default(), store.clone());
        seed(&h, &[]).await?;
        store
            .write(
                &EndpointConfig::key_for("ep1"),
                br#"{"net_id": "net1", "mac_address": "02:00:00:00:00:01", "ip_address": "10.1.0.1", "homing_host": "host1"}"#
                    .to_vec(),
            )
            .await?;
        store
            .write(
                &EndpointConfig::key_for("ep2"),
                br#"{"id": "ep1", "net_id": "net1", "mac_address": "02:00:00:00:00:02", "homing_host": "host1"}"#
                    .to_vec(),
            )
            .await?;

        h.driver.create_endpoint("ep1").await?;
        h.driver.create_endpoint("ep1").await?;
        h.driver.create_endpoint("ep2").await?;
        let veths = h
            .netlink
            .calls()
            .iter()
            .filter(|c| c.starts_with("veth"))
            .count();
        assert_eq!(veths, 2);
        assert_eq!(oper(&h, "ep1").await?.id, "ep1");
        assert_eq!(oper(&h, "ep1").await?.port_name, "vport1");
        assert_eq!(oper(&h, "ep2").await?.port_name, "vport2");

        h.driver.delete_endpoint("ep1").await?;
        h.driver.delete_endpoint("ep2").await?;
        assert!(!h.netlink.has_link("vport1"));
        assert!(!h.netlink.has_link("vport2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_oper_write_removes_port() -> crate::Result<()> {
        let h = harness_with_store(
            PortMode::Veth,
            FakeNetlink::default(),
            Arc::new(RejectOperWrites::default()),
        );
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;

        let err = h.driver.create_endpoint("ep1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::State(ovsnet_state::Error::Backend(_))
        ));
        assert!(h.netlink.calls().contains(&"veth vport1 vvport1".to_string()));
        assert!(!h.netlink.has_link("vport1"));
        assert!(!h.netlink.has_link("vvport1"));
        assert!(h.switch.calls().contains(&"del vvport1".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_teardown_failure_does_not_block_rebuild() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;
        h.driver.create_endpoint("ep1").await?;

        h.state
            .write(&endpoint("ep1", "02:00:00:00:00:09", "10.1.0.9"))
            .await?;
        h.netlink.fail_on("delete");
        h.driver.create_endpoint("ep1").await?;

        let rebuilt = oper(&h, "ep1").await?;
        assert_eq!(rebuilt.port_name, "vport2");
        assert_eq!(rebuilt.ip_address, "10.1.0.9");
        assert!(h.netlink.has_link("vport2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_config_or_network_is_propagated() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        seed(&h, &[]).await?;
        assert!(h.driver.create_endpoint("nope").await.unwrap_err().is_not_found());

        let mut orphan = endpoint("ep2", "02:00:00:00:00:02", "10.1.0.2");
        orphan.net_id = "gone".into();
        h.state.write(&orphan).await?;
        assert!(h.driver.create_endpoint("ep2").await.unwrap_err().is_not_found());
        assert!(h.netlink.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_group_falls_back_to_network_tag() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        let mut ep = endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1");
        ep.endpoint_group_id = "unknown".into();
        seed(&h, &[ep]).await?;

        h.driver.create_endpoint("ep1").await?;
        assert_eq!(h.switch.calls(), ["add vvport1 System 10"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_name_allocation_skips_live_links() -> crate::Result<()> {
        let h = harness(
            PortMode::Veth,
            FakeNetlink::default().with_links(["vport1", "vport2"]),
        );
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;

        h.driver.create_endpoint("ep1").await?;
        assert_eq!(oper(&h, "ep1").await?.port_name, "vport3");
        Ok(())
    }

    #[tokio::test]
    async fn test_name_allocation_is_bounded() -> crate::Result<()> {
        let taken: Vec<String> = (1..=10).map(|n| format!("vport{n}")).collect();
        let h = harness(
            PortMode::Veth,
            FakeNetlink::default().with_links(taken.iter().map(String::as_str)),
        );
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;

        let err = h.driver.create_endpoint("ep1").await.unwrap_err();
        assert!(err.is_exhausted());
        assert!(oper(&h, "ep1").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_counter_survives_restart() -> crate::Result<()> {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let h = harness_with_store(PortMode::Veth, FakeNetlink::default(), store.clone());
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;
        h.driver.create_endpoint("ep1").await?;

        let restarted = harness_with_store(PortMode::Veth, FakeNetlink::default(), store);
        restarted.state.write(&endpoint("ep2", "02:00:00:00:00:02", "10.1.0.2")).await?;
        restarted.driver.init().await?;
        restarted.driver.create_endpoint("ep2").await?;
        assert_eq!(oper(&restarted, "ep2").await?.port_name, "vport2");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_build_rolls_back_without_oper_state() -> crate::Result<()> {
        let netlink = FakeNetlink::default();
        netlink.fail_on("mac");
        let h = harness(PortMode::Veth, netlink);
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;

        let err = h.driver.create_endpoint("ep1").await.unwrap_err();
        assert!(matches!(err, Error::Platform { op: "mac", .. }));
        assert!(!h.netlink.has_link("vport1"));
        assert!(!h.netlink.has_link("vvport1"));
        assert!(oper(&h, "ep1").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_unknown_endpoint() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        seed(&h, &[]).await?;
        assert!(h.driver.delete_endpoint("ghost").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_removes_port_and_record() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;
        h.driver.create_endpoint("ep1").await?;

        h.driver.delete_endpoint("ep1").await?;
        assert!(!h.netlink.has_link("vport1"));
        assert!(h.switch.calls().contains(&"del vvport1".to_string()));
        assert!(oper(&h, "ep1").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_teardown_still_clears_record() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;
        h.driver.create_endpoint("ep1").await?;
        h.netlink.fail_on("delete");

        let err = h.driver.delete_endpoint("ep1").await.unwrap_err();
        assert!(matches!(err, Error::Platform { .. }));
        assert!(oper(&h, "ep1").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_endpoint_is_accounting_only() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        let mut ep = endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1");
        ep.homing_host = "host2".into();
        ep.vtep_ip = "192.168.10.2".into();
        seed(&h, &[ep]).await?;

        h.driver.create_endpoint("ep1").await?;
        let realized = oper(&h, "ep1").await?;
        assert!(realized.is_remote());
        assert!(realized.port_name.is_empty());

        h.driver.delete_endpoint("ep1").await?;
        assert!(h.netlink.calls().is_empty());
        assert!(h.switch.calls().is_empty());
        assert!(oper(&h, "ep1").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_attach_moves_container_interface() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;
        h.driver.create_endpoint("ep1").await?;

        h.driver.attach_endpoint("ep1", 4242).await?;
        assert!(h.netlink.calls().contains(&"netns vport1 4242".to_string()));
        assert!(h.driver.attach_endpoint("ghost", 1).await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_internal_mode_uses_single_interface() -> crate::Result<()> {
        let h = harness(PortMode::Internal, FakeNetlink::default());
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;

        h.driver.create_endpoint("ep1").await?;
        assert_eq!(h.switch.calls(), ["add vport1 Internal 20"]);
        assert_eq!(h.netlink.mtu("vport1"), Some(1450));
        assert!(!h.netlink.calls().iter().any(|c| c.starts_with("veth")));

        h.driver.delete_endpoint("ep1").await?;
        assert_eq!(h.switch.calls().last().map(String::as_str), Some("del vport1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_creates_of_one_id_build_one_port() -> crate::Result<()> {
        let h = Arc::new(harness(PortMode::Veth, FakeNetlink::default()));
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;

        let (a, b) = tokio::join!(
            h.driver.create_endpoint("ep1"),
            h.driver.create_endpoint("ep1")
        );
        a?;
        b?;
        let veths = h
            .netlink
            .calls()
            .iter()
            .filter(|c| c.starts_with("veth"))
            .count();
        assert_eq!(veths, 1);
        assert!(h.driver.locks.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_endpoints_lists_this_host_only() -> crate::Result<()> {
        let h = harness(PortMode::Veth, FakeNetlink::default());
        seed(&h, &[endpoint("ep1", "02:00:00:00:00:01", "10.1.0.1")]).await?;
        h.driver.create_endpoint("ep1").await?;
        let mut elsewhere =
            EndpointOperState::realized("host2", "ep9", &endpoint("ep9", "", ""), "vport1");
        elsewhere.host = "host2".into();
        h.state.write(&elsewhere).await?;

        let listed = h.driver.endpoints().await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "ep1");
        Ok(())
    }
}

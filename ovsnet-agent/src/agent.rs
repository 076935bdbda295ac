use std::sync::Arc;

use ovsnet_state::{EtcdStore, MemoryStore, StateDriver, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AgentArgs, StoreArgs, StoreKind};
use crate::driver::{NetworkDriver, VportDriver};
use crate::metrics::DriverMetrics;
use crate::netlink::Netlink;
use crate::resync::Resync;
use crate::switch::OvsVsctl;
use crate::{Error, Result, http, netlink};

pub async fn open_state(args: &StoreArgs) -> Result<StateDriver> {
    let store: Arc<dyn StateStore> = match args.store {
        StoreKind::Etcd => Arc::new(EtcdStore::connect(&args.etcd_endpoints, args.timeout()).await?),
        StoreKind::Memory => {
            warn!("using a process local store, state is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(StateDriver::new(store).with_timeout(args.timeout()))
}

/// Checks the host tools the driver shells out to. Both probes run commands,
/// so they stay off the async workers.
pub async fn probe_dataplane(bridge: &str) -> Result<(Arc<dyn Netlink>, Arc<OvsVsctl>)> {
    let bridge = bridge.to_owned();
    tokio::task::spawn_blocking(move || -> Result<(Arc<dyn Netlink>, Arc<OvsVsctl>)> {
        let netlink = netlink::host_netlink()?;
        let switch = Arc::new(OvsVsctl::probe(&bridge)?);
        Ok((netlink, switch))
    })
    .await
    .map_err(|e| Error::Task(e.to_string()))?
}

pub async fn start(
    args: AgentArgs,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    info!("probing host dataplane");
    let (netlink, switch) = probe_dataplane(&args.ovs_bridge).await?;

    info!("connecting to state store");
    let state = open_state(&args.store).await?;

    info!("initializing vport driver");
    let driver: Arc<dyn NetworkDriver> = Arc::new(
        VportDriver::new(args.driver_config(), state.clone(), netlink, switch)
            .with_metrics(DriverMetrics::registered()),
    );
    driver.init().await?;

    let mut api = tokio::spawn(http::api::serve(
        args.agent_socket_path.clone(),
        driver.clone(),
        cancel.child_token(),
    ));
    let resync = match args.resync_interval() {
        Some(interval) => Some(tokio::spawn(
            Resync::new(driver.clone(), state, &args.host_label).run(interval, cancel.child_token()),
        )),
        None => {
            info!("host resync disabled");
            None
        }
    };

    ready.cancel();
    let served = tokio::select! {
        _ = cancel.cancelled() => None,
        out = &mut api => Some(out),
    };
    // stops the resync loop when the api went down on its own
    cancel.cancel();
    let served = match served {
        Some(out) => out,
        None => api.await,
    };
    if let Some(resync) = resync
        && let Err(e) = resync.await
    {
        error!("resync task failed to complete: {e}");
    }
    driver.deinit().await;
    served.map_err(|e| Error::Task(e.to_string()))?
}

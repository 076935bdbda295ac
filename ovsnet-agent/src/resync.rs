use std::sync::Arc;
use std::time::Duration;

use ovsnet_state::StateDriver;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::driver::NetworkDriver;
use crate::records::EndpointConfig;

/// Periodically converges the endpoints realized on this host with the
/// desired records in the store.
pub struct Resync {
    driver: Arc<dyn NetworkDriver>,
    state: StateDriver,
    host: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub created: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl Resync {
    pub fn new(driver: Arc<dyn NetworkDriver>, state: StateDriver, host: &str) -> Self {
        Self {
            driver,
            state,
            host: host.to_owned(),
        }
    }

    /// Creates every endpoint this host is responsible for and deletes
    /// realized endpoints whose desired record is gone. Per endpoint failures
    /// are logged and counted.
    pub async fn pass(&self) -> Result<ResyncReport> {
        let desired = self
            .state
            .read_all_versioned::<EndpointConfig>(EndpointConfig::PREFIX)
            .await?;
        let wanted: ahash::HashSet<String> = desired
            .into_iter()
            .filter(|ep| ep.value.homing_host == self.host || ep.value.is_remote())
            .filter_map(|ep| EndpointConfig::id_from_key(&ep.key).map(str::to_owned))
            .collect();

        let mut report = ResyncReport::default();
        for id in &wanted {
            match self.driver.create_endpoint(id).await {
                Ok(()) => report.created += 1,
                Err(e) => {
                    warn!(%id, %e, "resync failed to create endpoint");
                    report.failed += 1;
                }
            }
        }

        for oper in self.driver.endpoints().await? {
            if wanted.contains(&oper.id) {
                continue;
            }
            match self.driver.delete_endpoint(&oper.id).await {
                Ok(()) => report.deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(id = %oper.id, %e, "resync failed to delete endpoint");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    pub async fn run(self, interval: Duration, cancel: CancellationToken) -> Result<()> {
        info!(?interval, "starting host resync");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.pass().await {
                Ok(report) => debug!(?report, "resync finished"),
                Err(e) => error!(%e, "resync failed"),
            }
        }
        info!("host resync stopped");
        Ok(())
    }
}

use ovsnet_state::{Codec, JsonCodec, Revision, StateDriver, StateRecord, Versioned};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::pool::ResourcePool;
use crate::{Error, ResourceKind, ResourceRegistry, ResourceValue, Result};

/// Number of read-modify-write rounds attempted before a contended commit is
/// reported as transient.
pub const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Persisted form of one pool instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub kind: ResourceKind,
    pub state: serde_json::Value,
}

impl StateRecord for ResourceRecord {
    fn key(&self) -> String {
        self.kind.key_for(&self.id)
    }
}

/// Routes `(id, kind)` to a pool variant and commits every change with a
/// conditional write against the revision that was read. Nothing is cached;
/// each call starts from the stored record.
#[derive(Clone)]
pub struct ResourceAllocator<C: Codec = JsonCodec> {
    state: StateDriver<C>,
    registry: ResourceRegistry,
}

impl<C: Codec> ResourceAllocator<C> {
    pub fn new(state: StateDriver<C>, registry: ResourceRegistry) -> Self {
        Self { state, registry }
    }

    async fn find(&self, id: &str, kind: ResourceKind) -> Result<Option<Versioned<ResourceRecord>>> {
        let instances = self
            .state
            .read_all_versioned::<ResourceRecord>(&kind.prefix())
            .await?;
        Ok(instances
            .into_iter()
            .find(|instance| instance.value.id == id && instance.value.kind == kind))
    }

    async fn load(
        &self,
        id: &str,
        kind: ResourceKind,
    ) -> Result<(Box<dyn ResourcePool>, Revision)> {
        let mut pool = self.registry.construct(kind, id)?;
        let current = self.find(id, kind).await?.ok_or_else(|| Error::NotFound {
            kind,
            id: id.to_owned(),
        })?;
        pool.restore(current.value.state)?;
        Ok((pool, current.revision))
    }

    /// Current state of a defined instance.
    pub async fn get(&self, id: &str, kind: ResourceKind) -> Result<ResourceRecord> {
        self.registry.construct(kind, id)?;
        self.find(id, kind)
            .await?
            .map(|instance| instance.value)
            .ok_or_else(|| Error::NotFound {
                kind,
                id: id.to_owned(),
            })
    }

    pub async fn define_resource(
        &self,
        id: &str,
        kind: ResourceKind,
        config: serde_json::Value,
    ) -> Result<()> {
        let mut pool = self.registry.construct(kind, id)?;
        if self.find(id, kind).await?.is_some() {
            return Err(Error::AlreadyExists {
                kind,
                id: id.to_owned(),
            });
        }
        pool.init(config)?;
        let record = ResourceRecord {
            id: id.to_owned(),
            kind,
            state: pool.snapshot()?,
        };
        match self.state.compare_and_swap(&record, Revision::ABSENT).await {
            Ok(_) => {
                info!(%id, %kind, "defined resource");
                Ok(())
            }
            Err(ovsnet_state::Error::Conflict { .. }) => Err(Error::AlreadyExists {
                kind,
                id: id.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn undefine_resource(&self, id: &str, kind: ResourceKind) -> Result<()> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let (mut pool, revision) = self.load(id, kind).await?;
            pool.deinit();
            match self
                .state
                .compare_and_clear(&kind.key_for(id), revision)
                .await
            {
                Ok(()) => {
                    info!(%id, %kind, "undefined resource");
                    return Ok(());
                }
                Err(ovsnet_state::Error::Conflict { .. }) => {
                    debug!(%id, %kind, attempt, "resource changed during undefine, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(contended(id, kind))
    }

    /// Takes the lowest free value of the instance.
    pub async fn allocate_resource_val(&self, id: &str, kind: ResourceKind) -> Result<ResourceValue> {
        let value = self.update(id, kind, |pool| pool.allocate()).await?;
        debug!(%id, %kind, %value, "allocated resource value");
        Ok(value)
    }

    pub async fn deallocate_resource_val(
        &self,
        id: &str,
        kind: ResourceKind,
        value: &ResourceValue,
    ) -> Result<()> {
        self.update(id, kind, |pool| pool.deallocate(value)).await?;
        debug!(%id, %kind, %value, "released resource value");
        Ok(())
    }

    async fn update<T>(
        &self,
        id: &str,
        kind: ResourceKind,
        op: impl Fn(&mut dyn ResourcePool) -> Result<T> + Send + Sync,
    ) -> Result<T> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let (mut pool, revision) = self.load(id, kind).await?;
            let out = op(pool.as_mut())?;
            let record = ResourceRecord {
                id: id.to_owned(),
                kind,
                state: pool.snapshot()?,
            };
            match self.state.compare_and_swap(&record, revision).await {
                Ok(_) => return Ok(out),
                Err(ovsnet_state::Error::Conflict { .. }) => {
                    debug!(%id, %kind, attempt, "resource changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(contended(id, kind))
    }
}

fn contended(id: &str, kind: ResourceKind) -> Error {
    Error::State(ovsnet_state::Error::Transient(format!(
        "{kind}/{id} still contended after {MAX_COMMIT_ATTEMPTS} attempts"
    )))
}

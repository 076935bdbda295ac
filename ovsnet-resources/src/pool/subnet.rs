use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::pool::{IdRange, ResourcePool};
use crate::{Error, ResourceKind, ResourceValue, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetPoolConfig {
    /// Address space the blocks are carved from.
    pub pool: Ipv4Network,
    /// Prefix length of every allocated block.
    pub alloc_len: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct SubnetState {
    config: SubnetPoolConfig,
    blocks: IdRange,
}

/// Hands out the `/alloc_len` blocks of `pool`, lowest address first. Block
/// `i` is tracked as index `i` of an [`IdRange`].
pub struct SubnetPool {
    id: String,
    state: Option<SubnetState>,
}

impl SubnetPool {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            state: None,
        }
    }

    fn state(&self) -> Result<&SubnetState> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig(format!("subnet pool {} is not initialised", self.id)))
    }
}

fn block_size(alloc_len: u8) -> u64 {
    1u64 << (32 - u32::from(alloc_len))
}

fn block(config: &SubnetPoolConfig, index: u32) -> Result<Ipv4Network> {
    let base = u64::from(u32::from(config.pool.network()));
    let addr = base + u64::from(index) * block_size(config.alloc_len);
    let addr = u32::try_from(addr).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    Ipv4Network::new(Ipv4Addr::from(addr), config.alloc_len)
        .map_err(|e| Error::InvalidConfig(e.to_string()))
}

fn index_of(config: &SubnetPoolConfig, net: &Ipv4Network) -> Option<u32> {
    if net.prefix() != config.alloc_len
        || net.ip() != net.network()
        || !config.pool.contains(net.network())
    {
        return None;
    }
    let offset = u64::from(u32::from(net.network())) - u64::from(u32::from(config.pool.network()));
    u32::try_from(offset / block_size(config.alloc_len)).ok()
}

impl ResourcePool for SubnetPool {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::AutoSubnets
    }

    fn init(&mut self, config: serde_json::Value) -> Result<()> {
        let config: SubnetPoolConfig =
            serde_json::from_value(config).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if config.pool.ip() != config.pool.network() {
            return Err(Error::InvalidConfig(format!(
                "pool {} is not aligned to its prefix",
                config.pool
            )));
        }
        if config.alloc_len < config.pool.prefix() || config.alloc_len > 32 {
            return Err(Error::InvalidConfig(format!(
                "alloc_len {} must be between {} and 32",
                config.alloc_len,
                config.pool.prefix()
            )));
        }
        let blocks = 1u64 << u32::from(config.alloc_len - config.pool.prefix());
        let blocks = u32::try_from(blocks)
            .map_err(|_| Error::InvalidConfig(format!("pool {} has too many blocks", config.pool)))?;
        self.state = Some(SubnetState {
            config,
            blocks: IdRange::new(0, blocks),
        });
        Ok(())
    }

    fn deinit(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.blocks.clear();
        }
    }

    fn allocate(&mut self) -> Result<ResourceValue> {
        let id = self.id.clone();
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| Error::InvalidConfig(format!("subnet pool {id} is not initialised")))?;
        let index = state
            .blocks
            .take_lowest()
            .ok_or_else(|| Error::ResourceExhausted(format!("{}/{id}", ResourceKind::AutoSubnets)))?;
        Ok(ResourceValue::Subnet(block(&state.config, index)?))
    }

    fn deallocate(&mut self, value: &ResourceValue) -> Result<()> {
        let invalid = || Error::InvalidValue {
            id: self.id.clone(),
            value: value.to_string(),
        };
        let ResourceValue::Subnet(net) = value else {
            return Err(invalid());
        };
        let config = self.state()?.config;
        let Some(index) = index_of(&config, net) else {
            return Err(invalid());
        };
        let released = self
            .state
            .as_mut()
            .is_some_and(|state| state.blocks.release(index));
        if released { Ok(()) } else { Err(invalid()) }
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.state).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    fn restore(&mut self, state: serde_json::Value) -> Result<()> {
        self.state =
            serde_json::from_value(state).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(())
    }
}

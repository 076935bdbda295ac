use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::pool::ResourcePool;
use crate::{Error, ResourceKind, ResourceValue, Result};

/// Exclusive upper bound for VLAN ids (0 and 4095 are reserved).
pub const VLAN_ID_LIMIT: u32 = 4095;
/// Exclusive upper bound for 24 bit VXLAN network identifiers.
pub const VXLAN_ID_LIMIT: u32 = 1 << 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeConfig {
    pub start: u32,
    pub end: u32,
}

/// Half-open `[start, end)` range of integers with the subset currently held.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub start: u32,
    pub end: u32,
    #[serde(default)]
    held: BTreeSet<u32>,
}

impl IdRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end,
            held: BTreeSet::new(),
        }
    }

    pub fn contains(&self, value: u32) -> bool {
        (self.start..self.end).contains(&value)
    }

    pub fn is_held(&self, value: u32) -> bool {
        self.held.contains(&value)
    }

    pub fn held(&self) -> impl Iterator<Item = u32> + '_ {
        self.held.iter().copied()
    }

    pub fn lowest_free(&self) -> Option<u32> {
        let mut candidate = self.start;
        for &held in self.held.range(self.start..self.end) {
            if held != candidate {
                break;
            }
            candidate += 1;
        }
        (candidate < self.end).then_some(candidate)
    }

    pub fn take_lowest(&mut self) -> Option<u32> {
        let value = self.lowest_free()?;
        self.held.insert(value);
        Some(value)
    }

    /// Returns false if `value` was not held.
    pub fn release(&mut self, value: u32) -> bool {
        self.held.remove(&value)
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }
}

/// Integer pool used for both VLAN and VXLAN ids; the variants only differ in
/// the bounds a config must respect.
pub struct RangePool {
    id: String,
    kind: ResourceKind,
    limit: u32,
    range: IdRange,
}

impl RangePool {
    pub fn vlan(id: &str) -> Self {
        Self::new(id, ResourceKind::AutoVlans, VLAN_ID_LIMIT)
    }

    pub fn vxlan(id: &str) -> Self {
        Self::new(id, ResourceKind::AutoVxlans, VXLAN_ID_LIMIT)
    }

    fn new(id: &str, kind: ResourceKind, limit: u32) -> Self {
        Self {
            id: id.to_owned(),
            kind,
            limit,
            range: IdRange::default(),
        }
    }

    pub fn range(&self) -> &IdRange {
        &self.range
    }
}

impl ResourcePool for RangePool {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn init(&mut self, config: serde_json::Value) -> Result<()> {
        let config: RangeConfig =
            serde_json::from_value(config).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if config.start == 0 || config.start >= config.end || config.end > self.limit {
            return Err(Error::InvalidConfig(format!(
                "{} range [{}, {}) must satisfy 1 <= start < end <= {}",
                self.kind, config.start, config.end, self.limit
            )));
        }
        self.range = IdRange::new(config.start, config.end);
        Ok(())
    }

    fn deinit(&mut self) {
        self.range.clear();
    }

    fn allocate(&mut self) -> Result<ResourceValue> {
        self.range
            .take_lowest()
            .map(ResourceValue::Id)
            .ok_or_else(|| Error::ResourceExhausted(format!("{}/{}", self.kind, self.id)))
    }

    fn deallocate(&mut self, value: &ResourceValue) -> Result<()> {
        match value {
            ResourceValue::Id(v) if self.range.release(*v) => Ok(()),
            _ => Err(Error::InvalidValue {
                id: self.id.clone(),
                value: value.to_string(),
            }),
        }
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.range).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    fn restore(&mut self, state: serde_json::Value) -> Result<()> {
        self.range =
            serde_json::from_value(state).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(())
    }
}

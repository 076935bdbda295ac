use crate::pool::{RangePool, ResourcePool, SubnetPool};
use crate::{Error, ResourceKind, Result};

/// Builds an empty pool instance for the given resource id.
pub type PoolConstructor = fn(&str) -> Box<dyn ResourcePool>;

/// Maps each resource kind to the constructor of its pool variant. Passed to
/// the allocator explicitly so tests can swap variants for fakes.
#[derive(Clone)]
pub struct ResourceRegistry {
    constructors: ahash::HashMap<ResourceKind, PoolConstructor>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::empty()
            .register(ResourceKind::AutoVlans, |id| Box::new(RangePool::vlan(id)))
            .register(ResourceKind::AutoVxlans, |id| Box::new(RangePool::vxlan(id)))
            .register(ResourceKind::AutoSubnets, |id| Box::new(SubnetPool::new(id)))
    }
}

impl ResourceRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: ahash::HashMap::default(),
        }
    }

    pub fn register(mut self, kind: ResourceKind, constructor: PoolConstructor) -> Self {
        self.constructors.insert(kind, constructor);
        self
    }

    pub fn contains(&self, kind: ResourceKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    pub fn construct(&self, kind: ResourceKind, id: &str) -> Result<Box<dyn ResourcePool>> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| Error::UnknownResourceType(kind.to_string()))?;
        Ok(constructor(id))
    }
}

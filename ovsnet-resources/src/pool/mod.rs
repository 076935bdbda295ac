mod range;
mod subnet;

pub use range::{IdRange, RangeConfig, RangePool, VLAN_ID_LIMIT, VXLAN_ID_LIMIT};
pub use subnet::{SubnetPool, SubnetPoolConfig};

use crate::{ResourceKind, ResourceValue, Result};

/// One resource variant holding a set of allocated values inside its
/// configured range.
///
/// Pools are plain in-memory objects. The allocator restores a pool from its
/// persisted snapshot, applies one operation and writes the new snapshot back,
/// so implementations never talk to the store themselves.
pub trait ResourcePool: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> ResourceKind;

    /// Validates and stores the value range.
    fn init(&mut self, config: serde_json::Value) -> Result<()>;

    /// Releases everything the pool holds.
    fn deinit(&mut self);

    /// Marks the lowest free value as held and returns it.
    fn allocate(&mut self) -> Result<ResourceValue>;

    /// Releases a currently held value.
    fn deallocate(&mut self, value: &ResourceValue) -> Result<()>;

    fn snapshot(&self) -> Result<serde_json::Value>;

    fn restore(&mut self, state: serde_json::Value) -> Result<()>;
}

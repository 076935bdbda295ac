//! Keyed record storage shared by the agent and the resource allocator.
//!
//! [`StateStore`] is the byte-level contract a replicated backend provides.
//! [`StateDriver`] layers typed records, a pluggable [`Codec`] and a request
//! timeout on top of it.

pub mod codec;
pub mod driver;
pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use codec::{Codec, JsonCodec};
pub use driver::StateDriver;
pub use etcd::EtcdStore;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum Error {
    #[error("key {key} not found")]
    NotFound { key: String },

    #[error("store unavailable: {0}")]
    Transient(String),

    #[error("revision of {key} changed since it was read")]
    Conflict { key: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Transient(_) => "transient",
            Error::Conflict { .. } => "conflict",
            Error::Codec(_) => "codec",
            Error::Backend(_) => "backend",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Backend modification revision of a key. [`Revision::ABSENT`] stands for a
/// key that does not exist yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub i64);

impl Revision {
    pub const ABSENT: Revision = Revision(0);
}

#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub key: String,
    pub revision: Revision,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            key: self.key,
            revision: self.revision,
            value: f(self.value),
        }
    }
}

/// Byte-level contract of the replicated store.
///
/// `read` fails with [`Error::NotFound`] for an absent key and `clear` is a
/// no-op for one. Unreachable backends surface [`Error::Transient`].
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn write(&self, key: &str, value: Vec<u8>) -> Result<Revision>;

    async fn read(&self, key: &str) -> Result<Versioned<Vec<u8>>>;

    /// Every record whose key starts with `prefix`, in no particular order.
    async fn read_all(&self, prefix: &str) -> Result<Vec<Versioned<Vec<u8>>>>;

    async fn clear(&self, key: &str) -> Result<()>;

    /// Writes `value` only if the key is still at `expected`. Fails with
    /// [`Error::Conflict`] otherwise.
    async fn compare_and_swap(&self, key: &str, expected: Revision, value: Vec<u8>)
    -> Result<Revision>;

    /// Deletes the key only if it is still at `expected`.
    async fn compare_and_clear(&self, key: &str, expected: Revision) -> Result<()>;
}

/// A record persisted through a [`StateDriver`] under its own key.
pub trait StateRecord: Serialize + DeserializeOwned + Send + Sync {
    fn key(&self) -> String;
}

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::{Codec, Error, JsonCodec, Result, Revision, StateRecord, StateStore, Versioned};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Typed access to a [`StateStore`]. Every backend call is bounded by
/// `timeout` and an expired call is reported as [`Error::Transient`].
#[derive(Clone)]
pub struct StateDriver<C: Codec = JsonCodec> {
    store: Arc<dyn StateStore>,
    codec: C,
    timeout: Duration,
}

impl StateDriver<JsonCodec> {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_codec(store, JsonCodec)
    }
}

impl<C: Codec> StateDriver<C> {
    pub fn with_codec(store: Arc<dyn StateStore>, codec: C) -> Self {
        Self {
            store,
            codec,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn timed<T>(
        &self,
        op: &'static str,
        key: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        trace!("store {op} {key}");
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::Transient(format!("{op} {key} timed out after {:?}", self.timeout)))?
    }

    pub async fn write<T: StateRecord>(&self, record: &T) -> Result<()> {
        let key = record.key();
        let bytes = self.codec.encode(record)?;
        self.timed("write", &key, self.store.write(&key, bytes))
            .await?;
        Ok(())
    }

    pub async fn read<T: StateRecord>(&self, key: &str) -> Result<T> {
        Ok(self.read_versioned(key).await?.value)
    }

    pub async fn read_versioned<T: StateRecord>(&self, key: &str) -> Result<Versioned<T>> {
        let raw = self.timed("read", key, self.store.read(key)).await?;
        let value = self.codec.decode(&raw.value)?;
        Ok(raw.map(|_| value))
    }

    pub async fn read_all<T: StateRecord>(&self, prefix: &str) -> Result<Vec<T>> {
        Ok(self
            .read_all_versioned(prefix)
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    pub async fn read_all_versioned<T: StateRecord>(
        &self,
        prefix: &str,
    ) -> Result<Vec<Versioned<T>>> {
        let raw = self
            .timed("read_all", prefix, self.store.read_all(prefix))
            .await?;
        let mut out = Vec::with_capacity(raw.len());
        for record in raw {
            let value = self.codec.decode(&record.value)?;
            out.push(record.map(|_| value));
        }
        Ok(out)
    }

    pub async fn clear(&self, key: &str) -> Result<()> {
        self.timed("clear", key, self.store.clear(key)).await
    }

    pub async fn compare_and_swap<T: StateRecord>(
        &self,
        record: &T,
        expected: Revision,
    ) -> Result<Revision> {
        let key = record.key();
        let bytes = self.codec.encode(record)?;
        self.timed(
            "compare_and_swap",
            &key,
            self.store.compare_and_swap(&key, expected, bytes),
        )
        .await
    }

    pub async fn compare_and_clear(&self, key: &str, expected: Revision) -> Result<()> {
        self.timed(
            "compare_and_clear",
            key,
            self.store.compare_and_clear(key, expected),
        )
        .await
    }
}

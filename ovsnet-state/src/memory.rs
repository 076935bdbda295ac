use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Error, Result, Revision, StateStore, Versioned};

/// Process-local store with the same revision semantics as the etcd backend.
/// Used for development runs and as the store behind unit tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    revision: i64,
    records: BTreeMap<String, (Revision, Vec<u8>)>,
}

impl Inner {
    fn put(&mut self, key: &str, value: Vec<u8>) -> Revision {
        self.revision += 1;
        let revision = Revision(self.revision);
        self.records.insert(key.to_owned(), (revision, value));
        revision
    }

    fn current(&self, key: &str) -> Revision {
        self.records
            .get(key)
            .map(|(revision, _)| *revision)
            .unwrap_or(Revision::ABSENT)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn write(&self, key: &str, value: Vec<u8>) -> Result<Revision> {
        let mut inner = self.inner.lock().await;
        Ok(inner.put(key, value))
    }

    async fn read(&self, key: &str) -> Result<Versioned<Vec<u8>>> {
        let inner = self.inner.lock().await;
        let Some((revision, value)) = inner.records.get(key) else {
            return Err(Error::NotFound { key: key.into() });
        };
        Ok(Versioned {
            key: key.into(),
            revision: *revision,
            value: value.clone(),
        })
    }

    async fn read_all(&self, prefix: &str) -> Result<Vec<Versioned<Vec<u8>>>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, (revision, value))| Versioned {
                key: key.clone(),
                revision: *revision,
                value: value.clone(),
            })
            .collect())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.records.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Revision,
        value: Vec<u8>,
    ) -> Result<Revision> {
        let mut inner = self.inner.lock().await;
        if inner.current(key) != expected {
            return Err(Error::Conflict { key: key.into() });
        }
        Ok(inner.put(key, value))
    }

    async fn compare_and_clear(&self, key: &str, expected: Revision) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.current(key) != expected {
            return Err(Error::Conflict { key: key.into() });
        }
        inner.records.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.read("/a/b").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() -> crate::Result<()> {
        let store = MemoryStore::new();
        store.write("/a/b", b"1".to_vec()).await?;
        store.clear("/a/b").await?;
        store.clear("/a/b").await?;
        assert!(store.read("/a/b").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_read_all_only_matches_prefix() -> crate::Result<()> {
        let store = MemoryStore::new();
        store.write("/a/b/1", b"1".to_vec()).await?;
        store.write("/a/b/2", b"2".to_vec()).await?;
        store.write("/a/bc", b"3".to_vec()).await?;
        store.write("/z", b"4".to_vec()).await?;

        let mut keys: Vec<String> = store
            .read_all("/a/b/")
            .await?
            .into_iter()
            .map(|v| v.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["/a/b/1".to_string(), "/a/b/2".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_compare_and_swap() -> crate::Result<()> {
        let store = MemoryStore::new();
        let first = store
            .compare_and_swap("/k", Revision::ABSENT, b"1".to_vec())
            .await?;

        // creating again must fail, the key exists now
        let err = store
            .compare_and_swap("/k", Revision::ABSENT, b"2".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let second = store.compare_and_swap("/k", first, b"3".to_vec()).await?;
        assert!(second > first);

        let err = store.compare_and_clear("/k", first).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        store.compare_and_clear("/k", second).await?;
        assert!(store.read("/k").await.unwrap_err().is_not_found());
        Ok(())
    }
}

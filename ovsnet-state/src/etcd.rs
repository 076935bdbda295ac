use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, GetOptions, Txn, TxnOp};
use tonic::Code;
use tracing::{debug, info};

use crate::{Error, Result, Revision, StateStore, Versioned};

/// [`StateStore`] backed by an etcd cluster. Conditional writes are etcd
/// transactions guarded on the key's `mod_revision`.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(endpoints: &[String], timeout: Duration) -> Result<Self> {
        info!("connecting to etcd at {}", endpoints.join(", "));
        let options = ConnectOptions::new()
            .with_connect_timeout(timeout)
            .with_timeout(timeout);
        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(from_etcd)?;
        Ok(Self { client })
    }
}

fn from_etcd(err: etcd_client::Error) -> Error {
    match err {
        etcd_client::Error::TransportError(e) => Error::Transient(e.to_string()),
        etcd_client::Error::GRpcStatus(status) => match status.code() {
            Code::Unavailable | Code::DeadlineExceeded | Code::Aborted | Code::ResourceExhausted => {
                Error::Transient(status.to_string())
            }
            _ => Error::Backend(status.to_string()),
        },
        etcd_client::Error::IoError(e) => Error::Transient(e.to_string()),
        other => Error::Backend(other.to_string()),
    }
}

fn guard(key: &str, expected: Revision) -> Compare {
    if expected == Revision::ABSENT {
        Compare::version(key, CompareOp::Equal, 0)
    } else {
        Compare::mod_revision(key, CompareOp::Equal, expected.0)
    }
}

#[async_trait]
impl StateStore for EtcdStore {
    async fn write(&self, key: &str, value: Vec<u8>) -> Result<Revision> {
        let mut kv = self.client.kv_client();
        let resp = kv.put(key, value, None).await.map_err(from_etcd)?;
        Ok(resp
            .header()
            .map(|h| Revision(h.revision()))
            .unwrap_or_default())
    }

    async fn read(&self, key: &str) -> Result<Versioned<Vec<u8>>> {
        let mut kv = self.client.kv_client();
        let resp = kv.get(key, None).await.map_err(from_etcd)?;
        let Some(record) = resp.kvs().first() else {
            return Err(Error::NotFound { key: key.into() });
        };
        Ok(Versioned {
            key: key.into(),
            revision: Revision(record.mod_revision()),
            value: record.value().to_vec(),
        })
    }

    async fn read_all(&self, prefix: &str) -> Result<Vec<Versioned<Vec<u8>>>> {
        let mut kv = self.client.kv_client();
        let resp = kv
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(from_etcd)?;
        let mut out = Vec::with_capacity(resp.kvs().len());
        for record in resp.kvs() {
            let key = record
                .key_str()
                .map_err(|e| Error::Backend(e.to_string()))?;
            out.push(Versioned {
                key: key.to_owned(),
                revision: Revision(record.mod_revision()),
                value: record.value().to_vec(),
            });
        }
        Ok(out)
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut kv = self.client.kv_client();
        kv.delete(key, None).await.map_err(from_etcd)?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Revision,
        value: Vec<u8>,
    ) -> Result<Revision> {
        let mut kv = self.client.kv_client();
        let txn = Txn::new()
            .when(vec![guard(key, expected)])
            .and_then(vec![TxnOp::put(key, value, None)]);
        let resp = kv.txn(txn).await.map_err(from_etcd)?;
        if !resp.succeeded() {
            debug!("conditional write of {key} at revision {} lost", expected.0);
            return Err(Error::Conflict { key: key.into() });
        }
        Ok(resp
            .header()
            .map(|h| Revision(h.revision()))
            .unwrap_or_default())
    }

    async fn compare_and_clear(&self, key: &str, expected: Revision) -> Result<()> {
        let mut kv = self.client.kv_client();
        let txn = Txn::new()
            .when(vec![guard(key, expected)])
            .and_then(vec![TxnOp::delete(key, None)]);
        let resp = kv.txn(txn).await.map_err(from_etcd)?;
        if !resp.succeeded() {
            return Err(Error::Conflict { key: key.into() });
        }
        Ok(())
    }
}

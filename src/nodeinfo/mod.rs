//! Cached read-through access to node display data
//!
//! The console around the engine shows block, mempool and wallet data; all
//! of it is read-only, passed through largely unchanged, and cached with
//! per-kind TTLs so page loads never hammer the node.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::cache::{CacheEntry, CacheError, CacheStore, Fetched};
use crate::config::CacheConfig;
use crate::gateway::{methods, RpcError, RpcGateway};

/// Read-only view of non-peer node data
pub struct NodeInfoReader {
    gateway: Arc<dyn RpcGateway>,
    cache: Arc<CacheStore>,
    ttls: CacheConfig,
}

impl NodeInfoReader {
    pub fn new(gateway: Arc<dyn RpcGateway>, cache: Arc<CacheStore>, ttls: CacheConfig) -> Self {
        NodeInfoReader {
            gateway,
            cache,
            ttls,
        }
    }

    async fn read(
        &self,
        key: &str,
        ttl: i64,
        method: &'static str,
        params: Value,
    ) -> Result<CacheEntry, CacheError<RpcError>> {
        let gateway = Arc::clone(&self.gateway);
        self.cache
            .get_or_fetch(key, ttl, move || async move {
                gateway.call(method, params).await.map(Fetched::from)
            })
            .await
    }

    /// Current best block height
    pub async fn block_count(&self) -> Result<CacheEntry, CacheError<RpcError>> {
        self.read(
            "rpc:blockcount",
            self.ttls.block_ttl_seconds,
            methods::BLOCK_COUNT,
            Value::Null,
        )
        .await
    }

    /// A block by hash, verbose form
    pub async fn block(&self, hash: &str) -> Result<CacheEntry, CacheError<RpcError>> {
        self.read(
            &format!("rpc:block:{}", hash),
            self.ttls.block_ttl_seconds,
            methods::GET_BLOCK,
            json!([hash]),
        )
        .await
    }

    /// A transaction by txid, decoded form
    pub async fn transaction(&self, txid: &str) -> Result<CacheEntry, CacheError<RpcError>> {
        self.read(
            &format!("rpc:tx:{}", txid),
            self.ttls.block_ttl_seconds,
            methods::GET_TRANSACTION,
            json!([txid, true]),
        )
        .await
    }

    /// Mempool statistics
    pub async fn mempool_info(&self) -> Result<CacheEntry, CacheError<RpcError>> {
        self.read(
            "rpc:mempool",
            self.ttls.mempool_ttl_seconds,
            methods::MEMPOOL_INFO,
            Value::Null,
        )
        .await
    }

    /// Wallet balance summary
    pub async fn wallet_summary(&self) -> Result<CacheEntry, CacheError<RpcError>> {
        self.read(
            "rpc:wallet",
            self.ttls.mempool_ttl_seconds,
            methods::WALLET_INFO,
            Value::Null,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RpcResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGateway {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RpcGateway for CountingGateway {
        async fn call(&self, method: &str, _params: Value) -> Result<RpcResponse, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match method {
                methods::BLOCK_COUNT => Ok(RpcResponse::live(json!(820_000))),
                methods::MEMPOOL_INFO => Ok(RpcResponse::live(json!({ "size": 12 }))),
                _ => Ok(RpcResponse::live(Value::Null)),
            }
        }
    }

    #[tokio::test]
    async fn test_reads_are_cached_per_kind() {
        let gateway = Arc::new(CountingGateway {
            calls: AtomicUsize::new(0),
        });
        let reader = NodeInfoReader::new(
            Arc::clone(&gateway) as Arc<dyn RpcGateway>,
            Arc::new(CacheStore::new()),
            crate::config::Config::default().cache,
        );

        let count = reader.block_count().await.unwrap();
        assert_eq!(count.value, json!(820_000));
        reader.block_count().await.unwrap();
        reader.mempool_info().await.unwrap();
        reader.mempool_info().await.unwrap();

        // One call per resource kind, the rest served from cache
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_blocks_are_cached_per_hash() {
        let gateway = Arc::new(CountingGateway {
            calls: AtomicUsize::new(0),
        });
        let reader = NodeInfoReader::new(
            Arc::clone(&gateway) as Arc<dyn RpcGateway>,
            Arc::new(CacheStore::new()),
            crate::config::Config::default().cache,
        );

        reader.block("aa".repeat(32).as_str()).await.unwrap();
        reader.block("bb".repeat(32).as_str()).await.unwrap();
        reader.block("aa".repeat(32).as_str()).await.unwrap();
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    }
}

// Copyright © 2026 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, spec::BinarySubtype, Binary, DateTime as BsonDateTime, Document};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use tracing::{debug, error, info};

use crate::cache::circuit_breaker::CircuitBreaker;
use crate::cache::CacheLayer;
use crate::config::MongoConfig;
use crate::serializer::{frame, unframe, CacheSerializer};
use crate::types::{CacheEntry, CoreError, LayerStats, Result};

const TTL_INDEX_NAME: &str = "stackcache_expiry_ttl";

#[derive(Debug, Default)]
struct MongoLayerMetrics {
    total_requests: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    errors: AtomicUsize,
}

fn bson_time(time: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(time.timestamp_millis())
}

/// MongoDB 缓存层
///
/// 每个条目是一个文档：`_id` 为 key，`value` 为带校验和的序列化字节，
/// `expiry` 上建有 TTL 索引，服务端会自行删除过期文档；`cleanup` 额外
/// 执行一次 `delete_many` 以便立即生效。
pub struct MongoCacheLayer<V> {
    name: String,
    collection: Collection<Document>,
    circuit_breaker: Arc<CircuitBreaker>,
    serializer: Arc<dyn CacheSerializer<V>>,
    metrics: Arc<MongoLayerMetrics>,
}

impl<V> MongoCacheLayer<V>
where
    V: Send + Sync + 'static,
{
    /// 连接 MongoDB，通过 ping 验证并确保 TTL 索引存在
    pub async fn connect(
        config: &MongoConfig,
        serializer: Arc<dyn CacheSerializer<V>>,
    ) -> Result<Self> {
        let mut options = ClientOptions::parse(config.url.as_str())
            .await
            .map_err(|e| {
                CoreError::ConfigurationError(format!("Invalid MongoDB URL {}: {}", config.url, e))
            })?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);
        options.app_name = Some("stackcache".to_string());

        let client = Client::with_options(options)
            .map_err(|e| CoreError::ConfigurationError(format!("Invalid MongoDB options: {}", e)))?;
        let database = client.database(&config.database);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| CoreError::StorageUnavailable(format!("MongoDB ping failed: {}", e)))?;

        let collection = database.collection::<Document>(&config.collection);
        let ttl_index = IndexModel::builder()
            .keys(doc! { "expiry": 1 })
            .options(
                IndexOptions::builder()
                    .name(TTL_INDEX_NAME.to_string())
                    .expire_after(Duration::ZERO)
                    .build(),
            )
            .build();
        collection.create_index(ttl_index).await?;

        info!(
            "MongoCacheLayer connected to {} ({}.{}), serializer={}",
            config.url,
            config.database,
            config.collection,
            serializer.name()
        );

        Ok(Self {
            name: "mongo".to_string(),
            collection,
            circuit_breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            serializer,
            metrics: Arc::new(MongoLayerMetrics::default()),
        })
    }

    fn record_error(&self, e: &CoreError) {
        self.metrics.errors.fetch_add(1, Ordering::Relaxed);
        error!("MongoDB layer error: {}", e);
    }
}

#[async_trait]
impl<V> CacheLayer<V> for MongoCacheLayer<V>
where
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

        let document = self
            .circuit_breaker
            .execute(async {
                let document = self.collection.find_one(doc! { "_id": key }).await?;
                Ok::<_, CoreError>(document)
            })
            .await
            .inspect_err(|e| self.record_error(e))?;

        let Some(document) = document else {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            debug!("MongoDB cache miss for key: {}", key);
            return Ok(None);
        };

        self.metrics.hits.fetch_add(1, Ordering::Relaxed);
        debug!("MongoDB cache hit for key: {}", key);
        let bytes = document.get_binary_generic("value").map_err(|e| {
            CoreError::SerializationError(format!("document {} has no value: {}", key, e))
        })?;
        let payload = unframe(bytes)?;
        self.serializer.deserialize(payload).map(Some)
    }

    async fn set(&self, key: &str, entry: CacheEntry<V>) -> Result<()> {
        let data = frame(self.serializer.serialize(&entry)?);
        let document = doc! {
            "_id": key,
            "value": Binary { subtype: BinarySubtype::Generic, bytes: data },
            "expiry": bson_time(entry.expiry()),
        };

        self.circuit_breaker
            .execute(async {
                self.collection
                    .replace_one(doc! { "_id": key }, document)
                    .upsert(true)
                    .await?;
                Ok::<_, CoreError>(())
            })
            .await
            .inspect_err(|e| self.record_error(e))?;

        debug!("MongoDB cache set for key: {}", key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.circuit_breaker
            .execute(async {
                self.collection.delete_one(doc! { "_id": key }).await?;
                Ok::<_, CoreError>(())
            })
            .await
            .inspect_err(|e| self.record_error(e))
    }

    async fn flush(&self) -> Result<()> {
        let deleted = self
            .circuit_breaker
            .execute(async {
                let result = self.collection.delete_many(doc! {}).await?;
                Ok::<_, CoreError>(result.deleted_count)
            })
            .await
            .inspect_err(|e| self.record_error(e))?;

        info!("Flushed {} documents from MongoDB layer", deleted);
        Ok(())
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize> {
        let deleted = self
            .circuit_breaker
            .execute(async {
                let result = self
                    .collection
                    .delete_many(doc! { "expiry": { "$lte": bson_time(now) } })
                    .await?;
                Ok::<_, CoreError>(result.deleted_count)
            })
            .await
            .inspect_err(|e| self.record_error(e))?;

        Ok(usize::try_from(deleted).unwrap_or(usize::MAX))
    }

    fn is_available(&self) -> bool {
        !self.circuit_breaker.is_rejecting()
    }

    fn stats(&self) -> Option<LayerStats> {
        Some(LayerStats {
            requests: self.metrics.total_requests.load(Ordering::Relaxed),
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            errors: self.metrics.errors.load(Ordering::Relaxed),
            breaker_open: self.circuit_breaker.state().is_open(),
            breaker_rejections: self.circuit_breaker.rejected_requests(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonCacheSerializer;

    #[tokio::test]
    async fn test_invalid_url_is_configuration_error() {
        let config = MongoConfig {
            url: "not-a-mongodb-url".to_string(),
            ..Default::default()
        };

        let result = MongoCacheLayer::<String>::connect(
            &config,
            Arc::new(JsonCacheSerializer::<String>::new()),
        )
        .await;

        assert!(matches!(result, Err(CoreError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_storage_unavailable() {
        let config = MongoConfig {
            url: "mongodb://127.0.0.1:1".to_string(),
            connect_timeout_ms: 200,
            ..Default::default()
        };

        let result = MongoCacheLayer::<String>::connect(
            &config,
            Arc::new(JsonCacheSerializer::<String>::new()),
        )
        .await;

        assert!(matches!(result, Err(CoreError::StorageUnavailable(_))));
    }
}

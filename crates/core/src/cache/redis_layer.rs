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
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::cache::circuit_breaker::CircuitBreaker;
use crate::cache::CacheLayer;
use crate::config::RedisConfig;
use crate::serializer::{frame, unframe, CacheSerializer};
use crate::types::{CacheEntry, CoreError, LayerStats, Result};

const MAX_IDLE: Duration = Duration::from_secs(300);
const SCAN_BATCH: usize = 500;

/// Redis 连接池条目
struct PooledConnection {
    connection: MultiplexedConnection,
    last_used: Instant,
}

impl PooledConnection {
    fn new(connection: MultiplexedConnection) -> Self {
        Self {
            connection,
            last_used: Instant::now(),
        }
    }

    fn is_stale(&self, max_idle: Duration) -> bool {
        self.last_used.elapsed() > max_idle
    }
}

/// Redis 连接池
struct ConnectionPool {
    client: redis::Client,
    idle: Mutex<Vec<PooledConnection>>,
    max_idle: usize,
    connect_timeout: Duration,
}

impl ConnectionPool {
    fn new(url: &str, max_idle: usize, connect_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            CoreError::ConfigurationError(format!("Invalid Redis URL {}: {}", url, e))
        })?;

        Ok(Self {
            client,
            idle: Mutex::new(Vec::new()),
            max_idle,
            connect_timeout,
        })
    }

    async fn get(&self) -> Result<MultiplexedConnection> {
        {
            let mut idle = self.idle.lock().await;
            while let Some(pooled) = idle.pop() {
                if !pooled.is_stale(MAX_IDLE) {
                    return Ok(pooled.connection);
                }
            }
        }

        // 创建新连接
        match tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(CoreError::StorageUnavailable(format!(
                "Failed to connect to Redis: {}",
                e
            ))),
            Err(_) => Err(CoreError::StorageUnavailable(format!(
                "Redis connect timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }

    async fn put_back(&self, connection: MultiplexedConnection) {
        let mut idle = self.idle.lock().await;
        if idle.len() < self.max_idle {
            idle.push(PooledConnection::new(connection));
        }
    }
}

#[derive(Debug, Default)]
struct RedisLayerMetrics {
    total_requests: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    errors: AtomicUsize,
}

/// Redis 缓存层
///
/// 条目以 `SET key value PXAT <expiry>` 写入，由 Redis 自行过期，因此
/// `cleanup` 无需做任何事。
pub struct RedisCacheLayer<V> {
    name: String,
    pool: Arc<ConnectionPool>,
    circuit_breaker: Arc<CircuitBreaker>,
    key_prefix: String,
    serializer: Arc<dyn CacheSerializer<V>>,
    metrics: Arc<RedisLayerMetrics>,
}

impl<V> RedisCacheLayer<V>
where
    V: Send + Sync + 'static,
{
    /// 连接 Redis 并通过 PING 验证
    pub async fn connect(
        config: &RedisConfig,
        serializer: Arc<dyn CacheSerializer<V>>,
    ) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::new(
            &config.url,
            config.pool_size as usize,
            Duration::from_millis(config.connect_timeout_ms),
        )?);

        let mut conn = pool.get().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::StorageUnavailable(format!("Redis PING failed: {}", e)))?;
        pool.put_back(conn).await;

        if pong != "PONG" {
            return Err(CoreError::StorageUnavailable(format!(
                "Unexpected PING response: {}",
                pong
            )));
        }

        info!(
            "RedisCacheLayer connected to {} with prefix '{}', serializer={}",
            config.url,
            config.key_prefix,
            serializer.name()
        );

        Ok(Self {
            name: "redis".to_string(),
            pool,
            circuit_breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            key_prefix: config.key_prefix.clone(),
            serializer,
            metrics: Arc::new(RedisLayerMetrics::default()),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn record_error(&self, e: &CoreError) {
        self.metrics.errors.fetch_add(1, Ordering::Relaxed);
        error!("Redis layer error: {}", e);
    }
}

#[async_trait]
impl<V> CacheLayer<V> for RedisCacheLayer<V>
where
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        let prefixed = self.prefixed(key);

        let data = self
            .circuit_breaker
            .execute(async {
                let mut conn = self.pool.get().await?;
                let data: Option<Vec<u8>> = conn.get(&prefixed).await.map_err(|e| {
                    CoreError::StorageUnavailable(format!("Redis GET {} failed: {}", prefixed, e))
                })?;
                self.pool.put_back(conn).await;
                Ok::<_, CoreError>(data)
            })
            .await
            .inspect_err(|e| self.record_error(e))?;

        match data {
            Some(bytes) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Redis cache hit for key: {}", key);
                let payload = unframe(&bytes)?;
                self.serializer.deserialize(payload).map(Some)
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Redis cache miss for key: {}", key);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry<V>) -> Result<()> {
        let data = frame(self.serializer.serialize(&entry)?);
        let prefixed = self.prefixed(key);
        let expiry_ms = entry.expiry().timestamp_millis();

        self.circuit_breaker
            .execute(async {
                let mut conn = self.pool.get().await?;
                let _: () = redis::cmd("SET")
                    .arg(&prefixed)
                    .arg(data)
                    .arg("PXAT")
                    .arg(expiry_ms)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| {
                        CoreError::StorageUnavailable(format!(
                            "Redis SET {} failed: {}",
                            prefixed, e
                        ))
                    })?;
                self.pool.put_back(conn).await;
                Ok::<_, CoreError>(())
            })
            .await
            .inspect_err(|e| self.record_error(e))?;

        debug!("Redis cache set for key: {}", key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let prefixed = self.prefixed(key);

        self.circuit_breaker
            .execute(async {
                let mut conn = self.pool.get().await?;
                let _: usize = conn.del(&prefixed).await.map_err(|e| {
                    CoreError::StorageUnavailable(format!("Redis DEL {} failed: {}", prefixed, e))
                })?;
                self.pool.put_back(conn).await;
                Ok::<_, CoreError>(())
            })
            .await
            .inspect_err(|e| self.record_error(e))
    }

    async fn flush(&self) -> Result<()> {
        let pattern = format!("{}*", self.key_prefix);

        let removed = self
            .circuit_breaker
            .execute(async {
                let mut conn = self.pool.get().await?;
                let mut cursor: u64 = 0;
                let mut removed = 0usize;
                loop {
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    if !keys.is_empty() {
                        let deleted: usize = conn.del(&keys).await?;
                        removed += deleted;
                    }
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                self.pool.put_back(conn).await;
                Ok::<_, CoreError>(removed)
            })
            .await
            .inspect_err(|e| self.record_error(e))?;

        info!("Flushed {} keys matching {}", removed, pattern);
        Ok(())
    }

    async fn cleanup(&self, _now: DateTime<Utc>) -> Result<usize> {
        Ok(0)
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

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

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cache::cleanup::{
    run_cleanup, CleanupReport, CleanupScheduler, DEFAULT_CLEANUP_FREQUENCY,
};
use crate::cache::{CacheLayer, MemoryCacheLayer};
use crate::clock::{Clock, SystemClock};
use crate::types::{
    CacheEntry, CacheMetrics, CacheMetricsSnapshot, CacheSettings, CoreError, Result,
};

type FlightResult<V> = Option<Result<CacheEntry<V>>>;
type FlightReceiver<V> = watch::Receiver<FlightResult<V>>;
type FlightSender<V> = watch::Sender<FlightResult<V>>;

/// 单次探测的结果
enum Probe<V> {
    Fresh { entry: CacheEntry<V>, layer_index: usize },
    Stale { entry: CacheEntry<V>, layer_index: usize },
    Miss { previous: Option<CacheEntry<V>> },
    Unavailable,
}

enum Registration<V> {
    Leader(FlightSender<V>),
    Follower(FlightReceiver<V>),
}

struct StackInner<V> {
    layers: Vec<Arc<dyn CacheLayer<V>>>,
    in_flight: DashMap<String, FlightReceiver<V>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<CacheMetrics>,
}

/// Removes the registry entry when the computing task finishes or is dropped.
struct FlightGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<StackInner<V>>,
    key: String,
}

impl<V> Drop for FlightGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
    }
}

/// 多层缓存栈
///
/// 层按从快到慢的顺序探测。新鲜命中会回填更快的层；陈旧命中立即返回旧值并在
/// 后台刷新；全部未命中时，同一个 key 的并发调用只触发一次计算。
pub struct CacheStack<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<StackInner<V>>,
    scheduler: Arc<CleanupScheduler>,
}

impl<V> Clone for CacheStack<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

impl<V> std::fmt::Debug for CacheStack<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStack")
            .field(
                "layers",
                &self.inner.layers.iter().map(|l| l.name()).collect::<Vec<_>>(),
            )
            .field("in_flight", &self.inner.in_flight.len())
            .field("cleanup_frequency", &self.scheduler.frequency())
            .finish()
    }
}

impl<V> CacheStack<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn builder() -> CacheStackBuilder<V> {
        CacheStackBuilder::new()
    }

    /// Returns the cached value for `key`, computing it at most once across
    /// concurrent callers when no layer holds a usable entry.
    ///
    /// `compute` receives the value of an expired entry, if any layer still
    /// had one. A stale entry is returned as is while `compute` refreshes it
    /// in the background.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        compute: F,
        settings: CacheSettings,
    ) -> Result<V>
    where
        F: FnOnce(Option<V>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.inner.metrics.record_request();
        let now = self.inner.clock.now();

        match self.inner.probe(key, now).await {
            Probe::Fresh { entry, layer_index } => {
                self.inner.backfill(key, &entry, layer_index).await;
                Ok(entry.into_value())
            }
            Probe::Stale { entry, layer_index } => {
                debug!(
                    "Stale hit for key {} in layer '{}', refreshing in background",
                    key,
                    self.inner.layers[layer_index].name()
                );
                self.refresh_in_background(key, compute, settings, entry.value().clone());
                Ok(entry.into_value())
            }
            Probe::Miss { previous } => {
                self.inner.metrics.record_miss();
                let previous = previous.map(CacheEntry::into_value);
                let receiver = match self.register(key) {
                    Registration::Leader(sender) => {
                        let receiver = sender.subscribe();
                        self.spawn_flight(key, sender, compute, settings, previous, false);
                        receiver
                    }
                    Registration::Follower(receiver) => {
                        debug!("Joining in-flight computation for key {}", key);
                        self.inner.metrics.record_coalesced_wait();
                        receiver
                    }
                };
                await_flight(receiver).await.map(CacheEntry::into_value)
            }
            Probe::Unavailable => {
                error!("All cache layers failed for key {}", key);
                Err(CoreError::AllLayersUnavailable)
            }
        }
    }

    /// Probes the layers without computing. Fresh hits are backfilled.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        self.inner.metrics.record_request();
        let now = self.inner.clock.now();

        match self.inner.probe(key, now).await {
            Probe::Fresh { entry, layer_index } => {
                self.inner.backfill(key, &entry, layer_index).await;
                Ok(Some(entry))
            }
            Probe::Stale { entry, .. } => Ok(Some(entry)),
            Probe::Miss { .. } => {
                self.inner.metrics.record_miss();
                Ok(None)
            }
            Probe::Unavailable => Err(CoreError::AllLayersUnavailable),
        }
    }

    /// Writes `value` to every layer.
    pub async fn set(
        &self,
        key: &str,
        value: V,
        settings: CacheSettings,
    ) -> Result<CacheEntry<V>> {
        let entry = CacheEntry::from_settings(value, &settings, self.inner.clock.now());
        let written = self.inner.write_layers(key, &entry, &self.inner.layers).await;

        if written == 0 {
            return Err(CoreError::AllLayersUnavailable);
        }
        Ok(entry)
    }

    /// Removes `key` from every layer.
    pub async fn evict(&self, key: &str) -> Result<()> {
        let results = join_all(self.inner.layers.iter().map(|layer| layer.remove(key))).await;
        self.inner.settle("evict", results)
    }

    pub async fn flush(&self) -> Result<()> {
        let results = join_all(self.inner.layers.iter().map(|layer| layer.flush())).await;
        self.inner.settle("flush", results)?;
        info!("Flushed {} cache layers", self.inner.layers.len());
        Ok(())
    }

    /// Runs one cleanup pass immediately, outside the schedule.
    pub async fn cleanup(&self) -> CleanupReport {
        run_cleanup(&self.inner.layers, self.inner.clock.now(), &self.inner.metrics).await
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn layers(&self) -> &[Arc<dyn CacheLayer<V>>] {
        &self.inner.layers
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Stops the cleanup scheduler. Computations already running are left to
    /// finish and still write their results.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        info!(
            "CacheStack shut down with {} computations in flight",
            self.inner.in_flight.len()
        );
    }

    /// 原子地登记计算：不存在则插入并成为 leader，否则等待已有计算
    fn register(&self, key: &str) -> Registration<V> {
        match self.inner.in_flight.entry(key.to_string()) {
            Entry::Occupied(occupied) => Registration::Follower(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let (sender, receiver) = watch::channel(None);
                vacant.insert(receiver);
                Registration::Leader(sender)
            }
        }
    }

    fn refresh_in_background<F, Fut, E>(
        &self,
        key: &str,
        compute: F,
        settings: CacheSettings,
        previous: V,
    ) where
        F: FnOnce(Option<V>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.inner.metrics.record_stale_hit();
        match self.register(key) {
            Registration::Leader(sender) => {
                self.inner.metrics.record_background_refresh();
                self.spawn_flight(key, sender, compute, settings, Some(previous), true);
            }
            Registration::Follower(_) => {
                debug!("Refresh for key {} already in flight", key);
            }
        }
    }

    /// The computation runs on its own task so that a caller giving up on
    /// the result does not cancel it for the other waiters.
    fn spawn_flight<F, Fut, E>(
        &self,
        key: &str,
        sender: FlightSender<V>,
        compute: F,
        settings: CacheSettings,
        previous: Option<V>,
        background: bool,
    ) where
        F: FnOnce(Option<V>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();

        tokio::spawn(async move {
            let guard = FlightGuard {
                inner: Arc::clone(&inner),
                key: key.clone(),
            };

            let outcome = AssertUnwindSafe(
                inner.compute_and_store(&key, compute, settings, previous, background),
            )
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(inner.record_panic(&key, panic, background)));

            // 先移除登记，使失败后的下一次调用重新计算
            drop(guard);
            sender.send_replace(Some(outcome));
        });
    }
}

impl<V> StackInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn probe(&self, key: &str, now: DateTime<Utc>) -> Probe<V> {
        let mut previous: Option<CacheEntry<V>> = None;
        let mut failed = 0;

        for (layer_index, layer) in self.layers.iter().enumerate() {
            if !layer.is_available() {
                debug!("Skipping unavailable layer '{}'", layer.name());
                self.metrics.record_layer_error();
                failed += 1;
                continue;
            }

            match layer.get(key).await {
                Ok(Some(entry)) if entry.is_expired(now) => {
                    debug!("Expired entry for key {} in layer '{}'", key, layer.name());
                    self.metrics.record_expired_hit();
                    previous.get_or_insert(entry);
                }
                Ok(Some(entry)) => {
                    self.metrics.record_hit(layer_index);
                    return if entry.is_stale(now) {
                        Probe::Stale { entry, layer_index }
                    } else {
                        Probe::Fresh { entry, layer_index }
                    };
                }
                Ok(None) => {}
                Err(e) if e.is_serialization() => {
                    warn!(
                        "Undecodable entry for key {} in layer '{}': {}",
                        key,
                        layer.name(),
                        e
                    );
                    self.metrics.record_serialization_error();
                }
                Err(e) => {
                    warn!("Layer '{}' failed to get key {}: {}", layer.name(), key, e);
                    self.metrics.record_layer_error();
                    failed += 1;
                }
            }
        }

        if failed == self.layers.len() {
            Probe::Unavailable
        } else {
            Probe::Miss { previous }
        }
    }

    /// Looks for an entry that is neither stale nor expired, without touching
    /// the metrics.
    async fn find_fresh(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry<V>> {
        for layer in self.layers.iter().filter(|layer| layer.is_available()) {
            if let Ok(Some(entry)) = layer.get(key).await {
                if !entry.is_expired(now) && !entry.is_stale(now) {
                    return Some(entry);
                }
            }
        }
        None
    }

    async fn backfill(&self, key: &str, entry: &CacheEntry<V>, layer_index: usize) {
        if layer_index == 0 {
            return;
        }

        let written = self
            .write_layers(key, entry, &self.layers[..layer_index])
            .await;
        self.metrics.record_backfill(written);
        debug!(
            "Backfilled key {} into {} of {} faster layers",
            key, written, layer_index
        );
    }

    /// Writes concurrently and returns how many layers accepted the entry.
    async fn write_layers(
        &self,
        key: &str,
        entry: &CacheEntry<V>,
        layers: &[Arc<dyn CacheLayer<V>>],
    ) -> usize {
        let results = join_all(layers.iter().map(|layer| layer.set(key, entry.clone()))).await;

        let mut written = 0;
        for (layer, result) in layers.iter().zip(results) {
            match result {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!("Layer '{}' failed to set key {}: {}", layer.name(), key, e);
                    if e.is_serialization() {
                        self.metrics.record_serialization_error();
                    }
                    self.metrics.record_write_failure();
                }
            }
        }
        written
    }

    async fn compute_and_store<F, Fut, E>(
        &self,
        key: &str,
        compute: F,
        settings: CacheSettings,
        previous: Option<V>,
        background: bool,
    ) -> Result<CacheEntry<V>>
    where
        F: FnOnce(Option<V>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        // 另一个计算可能在探测与登记之间已经写入
        if let Some(entry) = self.find_fresh(key, self.clock.now()).await {
            debug!("Key {} became fresh before computing, skipping", key);
            return Ok(entry);
        }

        self.metrics.record_computation();
        match compute(previous).await {
            Ok(value) => {
                let entry = CacheEntry::from_settings(value, &settings, self.clock.now());
                let written = self.write_layers(key, &entry, &self.layers).await;
                debug!(
                    "Computed key {} (expiry {}), stored in {} layers",
                    key,
                    entry.expiry(),
                    written
                );
                Ok(entry)
            }
            Err(e) => {
                if background {
                    self.metrics.record_refresh_failure();
                    error!("Background refresh of key {} failed: {}", key, e);
                } else {
                    self.metrics.record_compute_failure();
                    warn!("Computation of key {} failed: {}", key, e);
                }
                Err(CoreError::ComputeFailed(e.to_string()))
            }
        }
    }

    fn record_panic(&self, key: &str, panic: Box<dyn Any + Send>, background: bool) -> CoreError {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());

        if background {
            self.metrics.record_refresh_failure();
            error!("Background refresh of key {} panicked: {}", key, message);
        } else {
            self.metrics.record_compute_failure();
            error!("Computation of key {} panicked: {}", key, message);
        }
        CoreError::ComputeFailed(format!("computation panicked: {}", message))
    }

    /// Absorbs per-layer failures unless every layer failed.
    fn settle(&self, operation: &str, results: Vec<Result<()>>) -> Result<()> {
        let mut failed = 0;
        for (layer, result) in self.layers.iter().zip(&results) {
            if let Err(e) = result {
                warn!("Layer '{}' failed to {}: {}", layer.name(), operation, e);
                self.metrics.record_layer_error();
                failed += 1;
            }
        }

        if failed == self.layers.len() {
            Err(CoreError::AllLayersUnavailable)
        } else {
            Ok(())
        }
    }
}

async fn await_flight<V>(mut receiver: FlightReceiver<V>) -> Result<CacheEntry<V>>
where
    V: Clone,
{
    match receiver.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or_else(|| {
            Err(CoreError::InternalError("empty computation result".to_string()))
        }),
        Err(_) => Err(CoreError::ComputeFailed(
            "computation ended without producing a result".to_string(),
        )),
    }
}

/// Builder for [`CacheStack`]. Layers are probed in the order they are added.
pub struct CacheStackBuilder<V> {
    layers: Vec<Arc<dyn CacheLayer<V>>>,
    cleanup_frequency: Duration,
    clock: Arc<dyn Clock>,
}

impl<V> Default for CacheStackBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheStackBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            cleanup_frequency: DEFAULT_CLEANUP_FREQUENCY,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn add_layer(mut self, layer: Arc<dyn CacheLayer<V>>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn add_memory_layer(self) -> Self {
        self.add_layer(Arc::new(MemoryCacheLayer::new()))
    }

    pub fn with_cleanup_frequency(mut self, frequency: Duration) -> Self {
        self.cleanup_frequency = frequency;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the stack and starts its cleanup scheduler. Fails with
    /// `ConfigurationError` outside a Tokio runtime.
    pub fn build(self) -> Result<CacheStack<V>> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(CoreError::ConfigurationError(
                "a cache stack must be built inside a Tokio runtime".to_string(),
            ));
        }
        if self.layers.is_empty() {
            return Err(CoreError::ConfigurationError(
                "a cache stack needs at least one layer".to_string(),
            ));
        }
        if self.cleanup_frequency.is_zero() {
            return Err(CoreError::ConfigurationError(
                "cleanup frequency must be greater than zero".to_string(),
            ));
        }

        let metrics = Arc::new(CacheMetrics::new(self.layers.len()));
        let scheduler = CleanupScheduler::start(
            self.cleanup_frequency,
            self.layers.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&metrics),
        );

        info!(
            "CacheStack built with layers [{}]",
            self.layers
                .iter()
                .map(|layer| layer.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(CacheStack {
            inner: Arc::new(StackInner {
                layers: self.layers,
                in_flight: DashMap::new(),
                clock: self.clock,
                metrics,
            }),
            scheduler: Arc::new(scheduler),
        })
    }
}

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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::CacheLayer;
use crate::clock::Clock;
use crate::types::{CacheMetrics, CoreError};

pub const DEFAULT_CLEANUP_FREQUENCY: Duration = Duration::from_secs(5 * 60);

/// Outcome of one cleanup pass across every layer.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub failures: Vec<(String, CoreError)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sweeps all layers in parallel. A failing layer is reported in the result
/// and does not stop the others.
pub async fn run_cleanup<V>(
    layers: &[Arc<dyn CacheLayer<V>>],
    now: DateTime<Utc>,
    metrics: &CacheMetrics,
) -> CleanupReport
where
    V: Send + Sync + 'static,
{
    let results = join_all(layers.iter().map(|layer| layer.cleanup(now))).await;

    let mut report = CleanupReport::default();
    for (layer, result) in layers.iter().zip(results) {
        match result {
            Ok(removed) => report.removed += removed,
            Err(e) => {
                error!("Cleanup of layer '{}' failed: {}", layer.name(), e);
                report.failures.push((layer.name().to_string(), e));
            }
        }
    }

    metrics.record_cleanup(report.removed, report.failures.len());
    debug!(
        "Cleanup pass removed {} entries, {} layer failures",
        report.removed,
        report.failures.len()
    );
    report
}

/// Background task that runs [`run_cleanup`] on a fixed interval.
///
/// `stop` signals the task and waits for it to finish. Dropping a scheduler
/// that was never stopped aborts the task.
#[derive(Debug)]
pub struct CleanupScheduler {
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    frequency: Duration,
}

impl CleanupScheduler {
    pub fn start<V>(
        frequency: Duration,
        layers: Vec<Arc<dyn CacheLayer<V>>>,
        clock: Arc<dyn Clock>,
        metrics: Arc<CacheMetrics>,
    ) -> Self
    where
        V: Send + Sync + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + frequency, frequency);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Cache cleanup scheduled every {:?}", frequency);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = run_cleanup(&layers, clock.now(), &metrics).await;
                        if !report.is_clean() {
                            warn!(
                                "Cleanup finished with {} failing layers",
                                report.failures.len()
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cleanup scheduler received shutdown");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
            running: AtomicBool::new(true),
            frequency,
        }
    }

    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let _ = self.shutdown_tx.send(());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Cleanup task ended abnormally: {}", e);
            }
        }
        info!("Cache cleanup scheduler stopped");
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

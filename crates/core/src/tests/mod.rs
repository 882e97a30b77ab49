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

//! Engine-level tests for the cache stack

mod stack_tests;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::{CacheLayer, CacheStack};
use crate::types::{CacheEntry, CoreError, Result};

pub(crate) fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// A layer whose backend is permanently down.
#[derive(Debug, Default)]
pub(crate) struct FailingLayer {
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
}

fn offline() -> CoreError {
    CoreError::StorageUnavailable("backend offline".to_string())
}

#[async_trait]
impl<V> CacheLayer<V> for FailingLayer
where
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "failing"
    }

    async fn get(&self, _key: &str) -> Result<Option<CacheEntry<V>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Err(offline())
    }

    async fn set(&self, _key: &str, _entry: CacheEntry<V>) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        Err(offline())
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Err(offline())
    }

    async fn flush(&self) -> Result<()> {
        Err(offline())
    }

    async fn cleanup(&self, _now: DateTime<Utc>) -> Result<usize> {
        Err(offline())
    }
}

/// Counts invocations of a compute closure.
#[derive(Debug, Clone, Default)]
pub(crate) struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Waits until no computation or background refresh is registered.
pub(crate) async fn settle<V>(stack: &CacheStack<V>)
where
    V: Clone + Send + Sync + 'static,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while stack.in_flight_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("in-flight computations did not finish");
}

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

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{CacheEntry, LayerStats, Result};

/// A single storage tier of a cache stack.
///
/// `get` never fails for a missing key. Implementations report backend
/// problems as `StorageUnavailable` and undecodable payloads as
/// `SerializationError`; the stack treats both as a miss for this layer and
/// moves on. `cleanup` must be safe to run concurrently with `get`/`set`.
#[async_trait]
pub trait CacheLayer<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>>;

    async fn set(&self, key: &str, entry: CacheEntry<V>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn flush(&self) -> Result<()>;

    /// Removes every entry with `expiry <= now`, returning how many were removed.
    async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Whether the layer is worth probing right now. Remote layers report
    /// `false` while their backend is known to be down.
    fn is_available(&self) -> bool {
        true
    }

    /// Backend counters, for layers that keep any.
    fn stats(&self) -> Option<LayerStats> {
        None
    }
}

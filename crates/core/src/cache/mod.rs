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

pub mod circuit_breaker;
mod cleanup;
mod file_layer;
mod layer;
mod memory_layer;
#[cfg(feature = "mongo-layer")]
mod mongo_layer;
#[cfg(feature = "redis-layer")]
mod redis_layer;
mod stack;


pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use cleanup::{run_cleanup, CleanupReport, CleanupScheduler, DEFAULT_CLEANUP_FREQUENCY};
pub use file_layer::FileCacheLayer;
pub use layer::CacheLayer;
pub use memory_layer::MemoryCacheLayer;
#[cfg(feature = "mongo-layer")]
pub use mongo_layer::MongoCacheLayer;
#[cfg(feature = "redis-layer")]
pub use redis_layer::RedisCacheLayer;
pub use stack::{CacheStack, CacheStackBuilder};

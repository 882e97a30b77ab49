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

//! 多层缓存引擎
//!
//! 一个 [`CacheStack`] 由若干按速度排序的 [`CacheLayer`] 组成，提供带陈旧窗口、
//! 后台刷新和单飞计算的 `get_or_set`。

pub mod cache;
pub mod clock;
pub mod config;
pub mod serializer;
pub mod types;

#[cfg(test)]
mod tests;

pub use cache::*;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use serializer::*;
pub use types::*;

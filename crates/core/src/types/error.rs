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

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by cache layers, serializers and the cache stack.
///
/// Only [`CoreError::ComputeFailed`] and [`CoreError::AllLayersUnavailable`]
/// ever escape `CacheStack::get_or_set`; every other kind is absorbed by the
/// stack, logged and counted.
#[derive(Debug, Error, Display, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[display("Storage unavailable: {}", _0)]
    StorageUnavailable(String),

    #[display("All cache layers are unavailable")]
    AllLayersUnavailable,

    #[display("Value computation failed: {}", _0)]
    ComputeFailed(String),

    #[display("Serialization error: {}", _0)]
    SerializationError(String),

    #[display("Configuration error: {}", _0)]
    ConfigurationError(String),

    #[display("I/O error: {}", _0)]
    IoError(String),

    #[display("Internal error: {}", _0)]
    InternalError(String),
}

impl CoreError {
    pub fn is_serialization(&self) -> bool {
        matches!(self, CoreError::SerializationError(_))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::SerializationError(e.to_string())
    }
}

impl From<prost::DecodeError> for CoreError {
    fn from(e: prost::DecodeError) -> Self {
        CoreError::SerializationError(e.to_string())
    }
}

impl From<prost::EncodeError> for CoreError {
    fn from(e: prost::EncodeError) -> Self {
        CoreError::SerializationError(e.to_string())
    }
}

#[cfg(feature = "redis-layer")]
impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::StorageUnavailable(e.to_string())
    }
}

#[cfg(feature = "mongo-layer")]
impl From<mongodb::error::Error> for CoreError {
    fn from(e: mongodb::error::Error) -> Self {
        CoreError::StorageUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

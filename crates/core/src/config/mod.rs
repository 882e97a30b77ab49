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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::circuit_breaker::CircuitBreakerConfig;
use crate::types::{CacheSettings, CoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {}", _0)]
    MissingRequired(String),

    #[error("Invalid configuration value: {}", _0)]
    InvalidValue(String),

    #[error("Configuration file error: {}", _0)]
    FileError(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        CoreError::ConfigurationError(e.to_string())
    }
}

/// 缓存栈配置
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StackConfig {
    /// 过期条目清理周期（秒）
    pub cleanup_frequency_secs: u64,
    /// 默认存活时间（秒）
    pub default_ttl_secs: u64,
    /// 默认陈旧窗口（秒）
    pub default_stale_secs: u64,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            cleanup_frequency_secs: 300,
            default_ttl_secs: 24 * 60 * 60,
            default_stale_secs: 60 * 60,
        }
    }
}

impl StackConfig {
    pub fn cleanup_frequency(&self) -> Duration {
        Duration::from_secs(self.cleanup_frequency_secs)
    }

    pub fn default_settings(&self) -> CacheSettings {
        CacheSettings::new(
            Duration::from_secs(self.default_ttl_secs),
            Duration::from_secs(self.default_stale_secs),
        )
    }
}

/// 持久化层使用的序列化格式
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
    #[default]
    Json,
    Protobuf,
}

impl std::fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializerKind::Json => write!(f, "json"),
            SerializerKind::Protobuf => write!(f, "protobuf"),
        }
    }
}

/// 单个缓存层配置，按列表顺序从快到慢探测
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerConfig {
    Memory,
    File {
        directory: String,
        #[serde(default)]
        serializer: SerializerKind,
    },
    Redis {
        #[serde(default)]
        serializer: SerializerKind,
    },
    Mongo {
        #[serde(default)]
        serializer: SerializerKind,
    },
}

impl LayerConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            LayerConfig::Memory => "memory",
            LayerConfig::File { .. } => "file",
            LayerConfig::Redis { .. } => "redis",
            LayerConfig::Mongo { .. } => "mongo",
        }
    }
}

pub const DEFAULT_FILE_DIRECTORY: &str = "./stackcache-data";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: u32,
    pub key_prefix: String,
    pub connect_timeout_ms: u64,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            key_prefix: "stackcache:".to_string(),
            connect_timeout_ms: 2000,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// MongoDB 缓存层配置，条目存放在单独的集合中
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MongoConfig {
    pub url: String,
    pub database: String,
    pub collection: String,
    pub connect_timeout_ms: u64,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            database: "stackcache".to_string(),
            collection: "cache_entries".to_string(),
            connect_timeout_ms: 2000,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub stack: StackConfig,
    pub layers: Vec<LayerConfig>,
    pub redis: RedisConfig,
    pub mongo: MongoConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stack: StackConfig::default(),
            layers: vec![LayerConfig::Memory],
            redis: RedisConfig::default(),
            mongo: MongoConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }

    pub fn load_from_env() -> ConfigResult<Self> {
        let mut config = Config::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// 用环境变量覆盖当前配置；`lookup` 按变量名取值
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file_dir = lookup("STACKCACHE_FILE_DIR");

        if let Some(layers) = lookup("STACKCACHE_LAYERS") {
            self.layers = parse_layer_list(&layers, file_dir.as_deref())?;
        } else if let Some(dir) = file_dir {
            for layer in &mut self.layers {
                if let LayerConfig::File { directory, .. } = layer {
                    *directory = dir.clone();
                }
            }
        }

        if let Some(secs) = lookup("STACKCACHE_CLEANUP_SECS") {
            self.stack.cleanup_frequency_secs = secs
                .parse()
                .map_err(|_| ConfigError::InvalidValue("STACKCACHE_CLEANUP_SECS".to_string()))?;
        }

        if let Some(url) = lookup("REDIS_URL") {
            self.redis.url = url;
        }

        if let Some(url) = lookup("MONGO_URL") {
            self.mongo.url = url;
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.layers.is_empty() {
            return Err(ConfigError::MissingRequired(
                "at least one cache layer".to_string(),
            ));
        }
        if self.stack.cleanup_frequency_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "stack.cleanup_frequency_secs must be greater than 0".to_string(),
            ));
        }
        if self.stack.default_stale_secs > self.stack.default_ttl_secs {
            return Err(ConfigError::InvalidValue(format!(
                "stack.default_stale_secs ({}) exceeds stack.default_ttl_secs ({})",
                self.stack.default_stale_secs, self.stack.default_ttl_secs
            )));
        }

        for layer in &self.layers {
            match layer {
                LayerConfig::File { directory, .. } if directory.trim().is_empty() => {
                    return Err(ConfigError::MissingRequired(
                        "file layer directory".to_string(),
                    ));
                }
                LayerConfig::Redis { .. } => {
                    if self.redis.url.is_empty() {
                        return Err(ConfigError::MissingRequired("redis.url".to_string()));
                    }
                    if self.redis.pool_size == 0 {
                        return Err(ConfigError::InvalidValue(
                            "redis.pool_size must be greater than 0".to_string(),
                        ));
                    }
                }
                LayerConfig::Mongo { .. } => {
                    if self.mongo.url.is_empty() {
                        return Err(ConfigError::MissingRequired("mongo.url".to_string()));
                    }
                    if self.mongo.database.is_empty() || self.mongo.collection.is_empty() {
                        return Err(ConfigError::MissingRequired(
                            "mongo.database and mongo.collection".to_string(),
                        ));
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn parse_layer_list(list: &str, file_dir: Option<&str>) -> ConfigResult<Vec<LayerConfig>> {
    list.split(',')
        .map(str::trim)
        .filter(|kind| !kind.is_empty())
        .map(|kind| match kind.to_ascii_lowercase().as_str() {
            "memory" => Ok(LayerConfig::Memory),
            "file" => Ok(LayerConfig::File {
                directory: file_dir.unwrap_or(DEFAULT_FILE_DIRECTORY).to_string(),
                serializer: SerializerKind::Json,
            }),
            "redis" => Ok(LayerConfig::Redis {
                serializer: SerializerKind::Json,
            }),
            "mongo" | "mongodb" => Ok(LayerConfig::Mongo {
                serializer: SerializerKind::Json,
            }),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown layer kind '{}' in STACKCACHE_LAYERS",
                other
            ))),
        })
        .collect()
}

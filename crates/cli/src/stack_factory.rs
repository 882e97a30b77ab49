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

use std::sync::Arc;

use stackcache_core::config::{Config, LayerConfig, SerializerKind};
#[cfg(not(feature = "mongo-layer"))]
use stackcache_core::CoreError;
use stackcache_core::{
    CacheLayer, CacheSerializer, CacheStack, FileCacheLayer, JsonCacheSerializer,
    MemoryCacheLayer, ProtobufCacheSerializer, RedisCacheLayer, Result,
};
use tracing::info;

use crate::profile::UserProfile;

fn serializer_for(kind: SerializerKind) -> Arc<dyn CacheSerializer<UserProfile>> {
    match kind {
        SerializerKind::Json => Arc::new(JsonCacheSerializer::<UserProfile>::new()),
        SerializerKind::Protobuf => Arc::new(ProtobufCacheSerializer::<UserProfile>::new()),
    }
}

async fn build_layer(
    layer: &LayerConfig,
    config: &Config,
) -> Result<Arc<dyn CacheLayer<UserProfile>>> {
    let layer: Arc<dyn CacheLayer<UserProfile>> = match layer {
        LayerConfig::Memory => Arc::new(MemoryCacheLayer::<UserProfile>::new()),
        LayerConfig::File {
            directory,
            serializer,
        } => Arc::new(FileCacheLayer::open(directory, serializer_for(*serializer)).await?),
        LayerConfig::Redis { serializer } => Arc::new(
            RedisCacheLayer::connect(&config.redis, serializer_for(*serializer)).await?,
        ),
        #[cfg(feature = "mongo-layer")]
        LayerConfig::Mongo { serializer } => Arc::new(
            stackcache_core::MongoCacheLayer::connect(&config.mongo, serializer_for(*serializer))
                .await?,
        ),
        #[cfg(not(feature = "mongo-layer"))]
        LayerConfig::Mongo { .. } => {
            return Err(CoreError::ConfigurationError(
                "mongo layer requires building with the mongo-layer feature".to_string(),
            ));
        }
    };
    Ok(layer)
}

/// 按配置顺序构建用户资料缓存栈
pub async fn build_stack(config: &Config) -> Result<CacheStack<UserProfile>> {
    config.validate()?;

    let mut builder =
        CacheStack::builder().with_cleanup_frequency(config.stack.cleanup_frequency());
    for layer in &config.layers {
        info!("Configuring {} layer", layer.kind());
        builder = builder.add_layer(build_layer(layer, config).await?);
    }

    builder.build()
}

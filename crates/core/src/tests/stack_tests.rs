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

use crate::cache::{CacheLayer, CacheStack, FileCacheLayer, MemoryCacheLayer};
use crate::serializer::JsonCacheSerializer;
use crate::types::{CacheEntry, CacheSettings, CoreError};

use super::{epoch, settle, Calls, FailingLayer};

fn hour() -> CacheSettings {
    CacheSettings::with_ttl(Duration::from_secs(3600))
}

fn memory_stack(layers: &[Arc<MemoryCacheLayer<u32>>]) -> CacheStack<u32> {
    layers
        .iter()
        .fold(CacheStack::builder(), |builder, layer| {
            builder.add_layer(layer.clone() as Arc<dyn CacheLayer<u32>>)
        })
        .build()
        .unwrap()
}

async fn exploding(_previous: Option<u32>) -> std::result::Result<u32, String> {
    panic!("user directory exploded")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_compute_once() {
    let memory = Arc::new(MemoryCacheLayer::new());
    let stack = memory_stack(&[memory.clone()]);
    let calls = Calls::default();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let stack = stack.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            stack
                .get_or_set(
                    "user-1",
                    move |_| async move {
                        calls.bump();
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(42)
                    },
                    hour(),
                )
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 42);
    }

    assert_eq!(calls.count(), 1);
    assert_eq!(stack.metrics().computations, 1);
    assert_eq!(stack.in_flight_count(), 0);
    assert!(memory.contains_key("user-1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_compute_failure_reaches_every_waiter_and_is_not_cached() {
    let memory = Arc::new(MemoryCacheLayer::new());
    let stack = memory_stack(&[memory.clone()]);
    let calls = Calls::default();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let stack = stack.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            stack
                .get_or_set(
                    "user-2",
                    move |_| async move {
                        calls.bump();
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<u32, _>("directory timeout".to_string())
                    },
                    hour(),
                )
                .await
        }));
    }

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err, CoreError::ComputeFailed("directory timeout".to_string()));
    }
    assert_eq!(calls.count(), 1);
    assert!(memory.is_empty());
    assert_eq!(stack.in_flight_count(), 0);

    // 失败后的下一次调用重新计算
    let value = stack
        .get_or_set("user-2", |_| async { Ok::<_, String>(2) }, hour())
        .await
        .unwrap();
    assert_eq!(value, 2);
    assert_eq!(stack.metrics().compute_failures, 1);
}

#[tokio::test]
async fn test_panicking_compute_releases_waiters() {
    let stack = memory_stack(&[Arc::new(MemoryCacheLayer::new())]);

    let err = stack
        .get_or_set("user-3", exploding, hour())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ComputeFailed(msg) if msg.contains("user directory exploded")));
    assert_eq!(stack.in_flight_count(), 0);
    assert_eq!(stack.metrics().compute_failures, 1);

    let value = stack
        .get_or_set("user-3", |_| async { Ok::<_, String>(3) }, hour())
        .await
        .unwrap();
    assert_eq!(value, 3);
}

#[tokio::test]
async fn test_abandoned_caller_does_not_cancel_computation() {
    let memory = Arc::new(MemoryCacheLayer::new());
    let stack = memory_stack(&[memory.clone()]);
    let finished = Arc::new(AtomicBool::new(false));

    let flag = finished.clone();
    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        stack.get_or_set(
            "user-4",
            move |_| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, String>(4)
            },
            hour(),
        ),
    )
    .await;
    assert!(abandoned.is_err());

    settle(&stack).await;
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(*memory.get("user-4").await.unwrap().unwrap().value(), 4);
}

#[tokio::test]
async fn test_fresh_hit_in_slow_layer_backfills_faster_layers() {
    let l1 = Arc::new(MemoryCacheLayer::with_name("l1"));
    let l2 = Arc::new(MemoryCacheLayer::with_name("l2"));
    let l3 = Arc::new(MemoryCacheLayer::with_name("l3"));
    let stack = memory_stack(&[l1.clone(), l2.clone(), l3.clone()]);

    let entry = CacheEntry::from_settings(9, &hour(), chrono::Utc::now());
    l3.set("user-9", entry).await.unwrap();

    let calls = Calls::default();
    let counted = calls.clone();
    let value = stack
        .get_or_set(
            "user-9",
            move |_| async move {
                counted.bump();
                Ok::<_, String>(0)
            },
            hour(),
        )
        .await
        .unwrap();

    assert_eq!(value, 9);
    assert_eq!(calls.count(), 0);
    assert!(l1.contains_key("user-9"));
    assert!(l2.contains_key("user-9"));

    let metrics = stack.metrics();
    assert_eq!(metrics.layer_hits, vec![0, 0, 1]);
    assert_eq!(metrics.backfills, 2);
}

#[tokio::test]
async fn test_failing_layer_is_skipped() {
    let failing = Arc::new(FailingLayer::default());
    let memory = Arc::new(MemoryCacheLayer::<u32>::new());
    memory
        .set(
            "user-5",
            CacheEntry::from_settings(5, &hour(), chrono::Utc::now()),
        )
        .await
        .unwrap();

    let stack = CacheStack::builder()
        .add_layer(failing.clone() as Arc<dyn CacheLayer<u32>>)
        .add_layer(memory.clone() as Arc<dyn CacheLayer<u32>>)
        .build()
        .unwrap();

    let value = stack
        .get_or_set("user-5", |_| async { Ok::<_, String>(0) }, hour())
        .await
        .unwrap();
    assert_eq!(value, 5);

    // 未命中时仍然计算并写入健康的层
    let value = stack
        .get_or_set("user-6", |_| async { Ok::<_, String>(6) }, hour())
        .await
        .unwrap();
    assert_eq!(value, 6);
    assert!(memory.contains_key("user-6"));

    let metrics = stack.metrics();
    assert!(metrics.layer_errors >= 2);
    assert!(metrics.write_failures >= 1);
}

#[tokio::test]
async fn test_all_layers_failing_is_reported() {
    let calls = Calls::default();
    let stack = CacheStack::<u32>::builder()
        .add_layer(Arc::new(FailingLayer::default()))
        .add_layer(Arc::new(FailingLayer::default()))
        .build()
        .unwrap();

    let counted = calls.clone();
    let err = stack
        .get_or_set(
            "user-8",
            move |_| async move {
                counted.bump();
                Ok::<_, String>(8)
            },
            hour(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, CoreError::AllLayersUnavailable);
    assert_eq!(calls.count(), 0);
    assert_eq!(stack.evict("user-8").await, Err(CoreError::AllLayersUnavailable));
    assert_eq!(stack.flush().await, Err(CoreError::AllLayersUnavailable));
}

#[tokio::test]
async fn test_corrupted_file_entry_is_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let file = Arc::new(
        FileCacheLayer::open(dir.path(), Arc::new(JsonCacheSerializer::<u32>::new()))
            .await
            .unwrap(),
    );
    file.set(
        "user-10",
        CacheEntry::from_settings(1, &hour(), chrono::Utc::now()),
    )
    .await
    .unwrap();

    for item in std::fs::read_dir(dir.path()).unwrap() {
        let path = item.unwrap().path();
        if path.extension().is_some_and(|ext| ext == "bin") {
            std::fs::write(&path, b"not a cache entry").unwrap();
        }
    }

    let stack = CacheStack::builder()
        .add_memory_layer()
        .add_layer(file.clone() as Arc<dyn CacheLayer<u32>>)
        .build()
        .unwrap();

    let value = stack
        .get_or_set("user-10", |_| async { Ok::<_, String>(10) }, hour())
        .await
        .unwrap();

    assert_eq!(value, 10);
    assert_eq!(stack.metrics().serialization_errors, 1);
    assert_eq!(*file.get("user-10").await.unwrap().unwrap().value(), 10);
}

#[tokio::test]
async fn test_set_get_evict_flush() {
    let l1 = Arc::new(MemoryCacheLayer::new());
    let l2 = Arc::new(MemoryCacheLayer::new());
    let stack = memory_stack(&[l1.clone(), l2.clone()]);

    let entry = stack.set("user-11", 11, hour()).await.unwrap();
    assert!(l1.contains_key("user-11") && l2.contains_key("user-11"));
    assert_eq!(stack.get("user-11").await.unwrap(), Some(entry));

    stack.evict("user-11").await.unwrap();
    assert_eq!(stack.get("user-11").await.unwrap(), None);

    stack.set("user-12", 12, hour()).await.unwrap();
    stack.flush().await.unwrap();
    assert!(l1.is_empty() && l2.is_empty());
}

#[tokio::test]
async fn test_builder_rejects_invalid_stacks() {
    let empty = CacheStack::<u32>::builder().build();
    assert!(matches!(empty, Err(CoreError::ConfigurationError(_))));

    let zero = CacheStack::<u32>::builder()
        .add_memory_layer()
        .with_cleanup_frequency(Duration::ZERO)
        .build();
    assert!(matches!(zero, Err(CoreError::ConfigurationError(_))));
}

#[test]
fn test_builder_requires_runtime() {
    let err = CacheStack::<u32>::builder()
        .add_memory_layer()
        .build()
        .unwrap_err();
    assert!(matches!(err, CoreError::ConfigurationError(msg) if msg.contains("Tokio runtime")));
}

#[tokio::test]
async fn test_expired_value_is_passed_to_compute() {
    let memory = Arc::new(MemoryCacheLayer::new());
    let stack = memory_stack(&[memory.clone()]);
    let expired = CacheEntry::new(41, epoch(), epoch());
    memory.set("user-13", expired).await.unwrap();

    let value = stack
        .get_or_set(
            "user-13",
            |previous| async move { Ok::<_, String>(previous.unwrap_or(0) + 1) },
            hour(),
        )
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(stack.metrics().expired_hits, 1);
}

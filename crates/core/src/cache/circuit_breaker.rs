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

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::types::CoreError;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitBreakerState {
    /// 关闭状态，正常工作
    #[default]
    Closed,
    /// 半开状态，尝试恢复
    HalfOpen,
    /// 打开状态，拒绝请求
    Open,
}

impl CircuitBreakerState {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerState::Open)
    }
}

/// 熔断器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// 失败阈值（连续失败次数）
    pub failure_threshold: u64,
    /// 成功阈值（半开状态下的成功次数）
    pub success_threshold: u64,
    /// 打开状态持续时间（毫秒）
    pub timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_ms: 30000,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitBreakerState,
    consecutive_failures: u64,
    consecutive_successes: u64,
    next_attempt_at: Option<Instant>,
}

/// 熔断器实现
///
/// 远程缓存层的每个命令都经过熔断器；打开期间直接以 `StorageUnavailable`
/// 拒绝，缓存栈据此跳过该层。
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    rejected_requests: AtomicU64,
}

impl CircuitBreaker {
    /// 创建熔断器
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                next_attempt_at: None,
            }),
            rejected_requests: AtomicU64::new(0),
        }
    }

    /// 执行操作，如果熔断器打开则返回错误
    pub async fn execute<F, T>(&self, operation: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        if !self.should_allow_request() {
            self.rejected_requests.fetch_add(1, Ordering::Relaxed);
            return Err(CoreError::StorageUnavailable(
                "Circuit breaker is open".to_string(),
            ));
        }

        match operation.await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    /// 打开状态且未到重试时间时拒绝
    pub fn is_rejecting(&self) -> bool {
        let inner = self.inner.lock();
        inner.state.is_open()
            && inner
                .next_attempt_at
                .is_some_and(|next_attempt| Instant::now() < next_attempt)
    }

    fn should_allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => match inner.next_attempt_at {
                Some(next_attempt) if Instant::now() >= next_attempt => {
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    info!("Circuit breaker transitioned to half-open");
                    true
                }
                _ => false,
            },
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.consecutive_successes += 1;

        if inner.state == CircuitBreakerState::HalfOpen
            && inner.consecutive_successes >= self.config.success_threshold
        {
            inner.state = CircuitBreakerState::Closed;
            inner.consecutive_successes = 0;
            inner.next_attempt_at = None;
            info!("Circuit breaker closed, backend recovered");
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;

        // 半开状态下任何失败都重新打开
        let should_open = inner.state == CircuitBreakerState::HalfOpen
            || (inner.state == CircuitBreakerState::Closed
                && inner.consecutive_failures >= self.config.failure_threshold);

        if should_open {
            let next_attempt = Instant::now() + Duration::from_millis(self.config.timeout_ms);
            inner.state = CircuitBreakerState::Open;
            inner.next_attempt_at = Some(next_attempt);
            error!(
                "Circuit breaker opened after {} consecutive failures, retry in {}ms",
                inner.consecutive_failures, self.config.timeout_ms
            );
        }
    }

    /// 获取当前状态
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    pub fn rejected_requests(&self) -> u64 {
        self.rejected_requests.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn failing() -> Result<(), CoreError> {
        Err(CoreError::StorageUnavailable("connection refused".to_string()))
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout_ms: 10_000,
        });

        for _ in 0..2 {
            let _ = breaker.execute(async { failing() }).await;
        }

        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(breaker.is_rejecting());

        let rejected = breaker.execute(async { Ok::<_, CoreError>(()) }).await;
        assert!(matches!(rejected, Err(CoreError::StorageUnavailable(_))));
        assert_eq!(breaker.rejected_requests(), 1);
    }

    #[tokio::test]
    async fn test_half_open_recovery() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 2,
            timeout_ms: 50,
        });

        for _ in 0..2 {
            let _ = breaker.execute(async { failing() }).await;
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        sleep(Duration::from_millis(60)).await;

        breaker.execute(async { Ok::<_, CoreError>(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        breaker.execute(async { Ok::<_, CoreError>(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 3,
            timeout_ms: 20,
        });

        let _ = breaker.execute(async { failing() }).await;
        sleep(Duration::from_millis(30)).await;

        let _ = breaker.execute(async { failing() }).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
    }
}

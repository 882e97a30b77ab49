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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// 用户资料，可同时以 JSON 与 protobuf 编码
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
pub struct UserProfile {
    #[prost(int32, tag = "1")]
    pub user_id: i32,
    #[prost(string, tag = "2")]
    pub user_name: String,
    #[prost(int64, tag = "3")]
    pub updated_at_ms: i64,
}

pub fn cache_key(user_id: i32) -> String {
    format!("user-{}", user_id)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("User {} not found", _0)]
    NotFound(i32),
}

/// Stand-in for the slow source of truth behind the cache.
#[derive(Debug)]
pub struct UserDirectory {
    latency: Duration,
    lookups: AtomicUsize,
}

impl UserDirectory {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            lookups: AtomicUsize::new(0),
        }
    }

    pub async fn lookup(&self, user_id: i32) -> Result<UserProfile, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        debug!("Looking up user {} in directory", user_id);
        tokio::time::sleep(self.latency).await;

        if user_id <= 0 {
            return Err(DirectoryError::NotFound(user_id));
        }

        Ok(UserProfile {
            user_id,
            user_name: format!("user-{}", user_id),
            updated_at_ms: Utc::now().timestamp_millis(),
        })
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[tokio::test(start_paused = true)]
    async fn test_lookup_counts_calls() {
        let directory = UserDirectory::new(Duration::from_millis(200));

        let profile = directory.lookup(7).await.unwrap();
        assert_eq!(profile.user_id, 7);
        assert_eq!(profile.user_name, "user-7");

        assert_eq!(directory.lookup(0).await, Err(DirectoryError::NotFound(0)));
        assert_eq!(directory.lookups(), 2);
    }

    #[test]
    fn test_profile_encodes_both_ways() {
        let profile = UserProfile {
            user_id: 7,
            user_name: "user-7".to_string(),
            updated_at_ms: 1_700_000_000_000,
        };

        let decoded = UserProfile::decode(profile.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, profile);

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["user_id"], 7);
        assert_eq!(json["user_name"], "user-7");
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key(7), "user-7");
    }
}

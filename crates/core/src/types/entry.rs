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

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call settings describing how a freshly computed entry is timestamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub time_to_live: Duration,
    pub stale_after: Duration,
}

impl CacheSettings {
    pub fn new(time_to_live: Duration, stale_after: Duration) -> Self {
        Self {
            time_to_live,
            stale_after,
        }
    }

    /// Settings whose entries stay fresh until they expire.
    pub fn with_ttl(time_to_live: Duration) -> Self {
        Self {
            time_to_live,
            stale_after: time_to_live,
        }
    }
}

/// A cached value together with its expiry and staleness thresholds.
///
/// `stale_after <= expiry` always holds; constructors clamp it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    value: V,
    expiry: DateTime<Utc>,
    stale_after: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, expiry: DateTime<Utc>, stale_after: DateTime<Utc>) -> Self {
        Self {
            value,
            expiry,
            stale_after: stale_after.min(expiry),
        }
    }

    pub fn from_settings(value: V, settings: &CacheSettings, now: DateTime<Utc>) -> Self {
        let expiry = offset(now, settings.time_to_live);
        let stale_after = offset(now, settings.stale_after);
        Self::new(value, expiry, stale_after)
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub fn stale_after(&self) -> DateTime<Utc> {
        self.stale_after
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.stale_after <= now && now < self.expiry
    }
}

fn offset(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_from_settings_derives_timestamps() {
        let settings = CacheSettings::new(Duration::from_secs(60), Duration::from_secs(10));
        let entry = CacheEntry::from_settings(42u32, &settings, epoch());

        assert_eq!(entry.expiry(), epoch() + TimeDelta::seconds(60));
        assert_eq!(entry.stale_after(), epoch() + TimeDelta::seconds(10));
    }

    #[test]
    fn test_stale_after_clamped_to_expiry() {
        let settings = CacheSettings::new(Duration::from_secs(10), Duration::from_secs(60));
        let entry = CacheEntry::from_settings("v", &settings, epoch());

        assert_eq!(entry.stale_after(), entry.expiry());
    }

    #[test]
    fn test_freshness_windows() {
        let settings = CacheSettings::new(Duration::from_secs(60), Duration::from_secs(10));
        let entry = CacheEntry::from_settings(1u8, &settings, epoch());

        let at = |secs| epoch() + TimeDelta::seconds(secs);
        assert!(!entry.is_stale(at(5)));
        assert!(!entry.is_expired(at(5)));
        assert!(entry.is_stale(at(15)));
        assert!(!entry.is_expired(at(15)));
        assert!(entry.is_expired(at(60)));
        assert!(!entry.is_stale(at(65)));
    }

    #[test]
    fn test_with_ttl_never_stale_before_expiry() {
        let settings = CacheSettings::with_ttl(Duration::from_secs(30));
        let entry = CacheEntry::from_settings((), &settings, epoch());

        assert!(!entry.is_stale(epoch() + TimeDelta::seconds(29)));
        assert!(entry.is_expired(epoch() + TimeDelta::seconds(30)));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let settings = CacheSettings::with_ttl(Duration::from_secs(u64::MAX));
        let entry = CacheEntry::from_settings((), &settings, epoch());

        assert_eq!(entry.expiry(), DateTime::<Utc>::MAX_UTC);
    }
}

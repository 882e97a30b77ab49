use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::serializer::CacheSerializer;
use crate::types::{CacheEntry, Result};

pub struct JsonCacheSerializer<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCacheSerializer<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCacheSerializer<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheSerializer<V> for JsonCacheSerializer<V>
where
    V: Serialize + DeserializeOwned,
{
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, entry: &CacheEntry<V>) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(entry)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CacheEntry<V>> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CacheSettings;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: i32,
        name: String,
        tags: Vec<String>,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_round_trip_struct() {
        let serializer = JsonCacheSerializer::<Profile>::new();
        let entry = CacheEntry::from_settings(
            Profile {
                id: 7,
                name: "username-7".to_string(),
                tags: vec!["a".to_string()],
            },
            &CacheSettings::new(Duration::from_secs(86_400), Duration::from_secs(3_600)),
            now(),
        );

        let bytes = serializer.serialize(&entry).unwrap();
        assert_eq!(serializer.deserialize(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let serializer = JsonCacheSerializer::<Profile>::new();
        let err = serializer.deserialize(b"{not json").unwrap_err();
        assert!(err.is_serialization());
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            id in any::<i32>(),
            name in ".*",
            tags in proptest::collection::vec("[a-z]{0,8}", 0..4),
            ttl in 0u64..10_000_000,
            stale in 0u64..10_000_000,
        ) {
            let serializer = JsonCacheSerializer::<Profile>::new();
            let entry = CacheEntry::from_settings(
                Profile { id, name, tags },
                &CacheSettings::new(Duration::from_secs(ttl), Duration::from_secs(stale)),
                now(),
            );

            let bytes = serializer.serialize(&entry).unwrap();
            prop_assert_eq!(serializer.deserialize(&bytes).unwrap(), entry);
        }
    }
}

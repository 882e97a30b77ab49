use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use prost::Message;

use crate::serializer::CacheSerializer;
use crate::types::{CacheEntry, CoreError, Result};

/// Wire envelope: the encoded value plus both entry timestamps.
#[derive(Clone, PartialEq, Message)]
struct EntryEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    value: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    expiry: Option<Timestamp>,
    #[prost(message, optional, tag = "3")]
    stale_after: Option<Timestamp>,
}

/// Seconds since the epoch plus the sub-second part, so no precision is lost.
#[derive(Clone, Copy, PartialEq, Message)]
struct Timestamp {
    #[prost(int64, tag = "1")]
    seconds: i64,
    #[prost(uint32, tag = "2")]
    nanos: u32,
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self {
            seconds: time.timestamp(),
            nanos: time.timestamp_subsec_nanos(),
        }
    }
}

pub struct ProtobufCacheSerializer<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> ProtobufCacheSerializer<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for ProtobufCacheSerializer<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheSerializer<V> for ProtobufCacheSerializer<V>
where
    V: Message + Default,
{
    fn name(&self) -> &'static str {
        "protobuf"
    }

    fn serialize(&self, entry: &CacheEntry<V>) -> Result<Vec<u8>> {
        let envelope = EntryEnvelope {
            value: entry.value().encode_to_vec(),
            expiry: Some(entry.expiry().into()),
            stale_after: Some(entry.stale_after().into()),
        };
        Ok(envelope.encode_to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CacheEntry<V>> {
        let envelope = EntryEnvelope::decode(bytes)?;
        let value = V::decode(envelope.value.as_slice())?;
        let expiry = to_datetime(envelope.expiry, "expiry")?;
        let stale_after = to_datetime(envelope.stale_after, "stale_after")?;
        Ok(CacheEntry::new(value, expiry, stale_after))
    }
}

fn to_datetime(timestamp: Option<Timestamp>, field: &str) -> Result<DateTime<Utc>> {
    let timestamp = timestamp
        .ok_or_else(|| CoreError::SerializationError(format!("missing {} timestamp", field)))?;
    DateTime::from_timestamp(timestamp.seconds, timestamp.nanos).ok_or_else(|| {
        CoreError::SerializationError(format!(
            "{} timestamp out of range: {}s {}ns",
            field, timestamp.seconds, timestamp.nanos
        ))
    })
}

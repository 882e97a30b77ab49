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

mod json;
mod protobuf;

pub use json::JsonCacheSerializer;
pub use protobuf::ProtobufCacheSerializer;

use crate::types::{CacheEntry, CoreError, Result};

const CHECKSUM_LEN: usize = 4;

/// Converts entries to and from bytes for layers that outlive the process.
pub trait CacheSerializer<V>: Send + Sync {
    fn name(&self) -> &'static str;

    fn serialize(&self, entry: &CacheEntry<V>) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<CacheEntry<V>>;
}

/// 追加 CRC32 校验和 (小端序)
pub fn frame(mut payload: Vec<u8>) -> Vec<u8> {
    let checksum = crc32fast::hash(&payload);
    payload.extend_from_slice(&checksum.to_le_bytes());
    payload
}

/// 校验并剥离 CRC32 校验和
pub fn unframe(bytes: &[u8]) -> Result<&[u8]> {
    let Some((payload, stored)) = bytes.split_last_chunk::<CHECKSUM_LEN>() else {
        return Err(CoreError::SerializationError(format!(
            "payload too short for checksum: {} bytes",
            bytes.len()
        )));
    };

    let computed = crc32fast::hash(payload);
    let stored = u32::from_le_bytes(*stored);
    if computed != stored {
        return Err(CoreError::SerializationError(format!(
            "CRC32 mismatch: stored {:08x}, computed {:08x}",
            stored, computed
        )));
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_appends_checksum() {
        let framed = frame(vec![1, 2, 3]);
        assert_eq!(framed.len(), 7);
        assert_eq!(unframe(&framed).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_empty_payload_frames() {
        let framed = frame(Vec::new());
        assert_eq!(framed.len(), CHECKSUM_LEN);
        assert!(unframe(&framed).unwrap().is_empty());
    }

    #[test]
    fn test_corruption_detected() {
        let mut framed = frame(b"user-7".to_vec());
        framed[0] ^= 0xff;

        let err = unframe(&framed).unwrap_err();
        assert!(err.is_serialization());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        assert!(unframe(&[1, 2]).unwrap_err().is_serialization());
    }
}

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

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::CacheLayer;
use crate::serializer::{frame, unframe, CacheSerializer};
use crate::types::{CacheEntry, CoreError, Result};

const ENTRY_EXTENSION: &str = "bin";
const TEMP_EXTENSION_PREFIX: &str = "tmp";
/// Expiry seconds (i64) and nanoseconds (u32), big-endian.
const HEADER_LEN: usize = 12;
const LOCK_STRIPES: usize = 64;

/// Layer that keeps one file per key inside a directory.
///
/// Every file starts with the entry expiry, so the expiry index is rebuilt
/// by reading file headers on open and cleanup never decodes payloads.
/// Files are written to a temporary name and renamed into place. Mutations
/// of one file are serialized by a lock stripe chosen from the file name.
pub struct FileCacheLayer<V> {
    name: String,
    directory: PathBuf,
    serializer: Arc<dyn CacheSerializer<V>>,
    index: DashMap<String, DateTime<Utc>>,
    locks: Vec<Mutex<()>>,
    write_sequence: AtomicU64,
}

impl<V> FileCacheLayer<V>
where
    V: Send + Sync + 'static,
{
    pub async fn open(
        directory: impl Into<PathBuf>,
        serializer: Arc<dyn CacheSerializer<V>>,
    ) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .await
            .map_err(|e| storage_error("create cache directory", &directory, e))?;

        let layer = Self {
            name: "file".to_string(),
            directory,
            serializer,
            index: DashMap::new(),
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            write_sequence: AtomicU64::new(0),
        };
        layer.rebuild_index().await?;

        info!(
            "FileCacheLayer opened at {} with {} serializer, {} entries",
            layer.directory.display(),
            layer.serializer.name(),
            layer.index.len()
        );
        Ok(layer)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn lock_for(&self, file_name: &str) -> &Mutex<()> {
        let stripe = file_name
            .get(..2)
            .and_then(|prefix| u8::from_str_radix(prefix, 16).ok())
            .unwrap_or(0);
        &self.locks[usize::from(stripe) % LOCK_STRIPES]
    }

    async fn list_entry_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.directory)
            .await
            .map_err(|e| storage_error("list", &self.directory, e))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| storage_error("list", &self.directory, e))?
        {
            let path = item.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match path.extension().and_then(|e| e.to_str()) {
                Some(ENTRY_EXTENSION) => names.push(file_name.to_string()),
                Some(ext) if ext.starts_with(TEMP_EXTENSION_PREFIX) => {
                    debug!("Removing leftover temporary file {}", path.display());
                    let _ = fs::remove_file(&path).await;
                }
                _ => {}
            }
        }
        Ok(names)
    }

    async fn rebuild_index(&self) -> Result<()> {
        for file_name in self.list_entry_files().await? {
            let path = self.directory.join(&file_name);
            let expiry = match read_expiry(&path).await {
                Ok(expiry) => expiry,
                Err(e) => {
                    // 头部损坏的文件在下一次清理时删除
                    warn!("Unreadable cache file {}: {}", path.display(), e);
                    DateTime::<Utc>::MIN_UTC
                }
            };
            self.index.insert(file_name, expiry);
        }
        Ok(())
    }

    async fn write_atomically(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let sequence = self.write_sequence.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("{}{}", TEMP_EXTENSION_PREFIX, sequence));

        fs::write(&temp_path, bytes)
            .await
            .map_err(|e| storage_error("write", &temp_path, e))?;

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(storage_error("rename", path, e));
        }
        Ok(())
    }

    async fn delete_file(&self, file_name: &str) -> Result<()> {
        let path = self.directory.join(file_name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete", &path, e)),
        }
    }

    /// Deletes the file and drops it from the index, under its lock stripe.
    async fn delete_entry(&self, file_name: &str) -> Result<()> {
        let _guard = self.lock_for(file_name).lock().await;
        self.delete_file(file_name).await?;
        self.index.remove(file_name);
        Ok(())
    }

    async fn forget_if_missing(&self, file_name: &str) {
        let _guard = self.lock_for(file_name).lock().await;
        let path = self.directory.join(file_name);
        if !fs::try_exists(&path).await.unwrap_or(true) {
            self.index.remove(file_name);
        }
    }
}

#[async_trait]
impl<V> CacheLayer<V> for FileCacheLayer<V>
where
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        let file_name = file_name_for(key);
        let path = self.directory.join(&file_name);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.index.contains_key(&file_name) {
                    debug!("Cache file for key {} vanished, dropping from index", key);
                    self.forget_if_missing(&file_name).await;
                }
                return Ok(None);
            }
            Err(e) => return Err(storage_error("read", &path, e)),
        };

        let payload = unframe(&bytes)?;
        let body = payload.get(HEADER_LEN..).ok_or_else(|| {
            CoreError::SerializationError(format!("cache file {} is truncated", path.display()))
        })?;
        self.serializer.deserialize(body).map(Some)
    }

    async fn set(&self, key: &str, entry: CacheEntry<V>) -> Result<()> {
        // Serialize before touching disk so a bad value leaves the old file intact.
        let payload = self.serializer.serialize(&entry)?;
        let mut contents = Vec::with_capacity(HEADER_LEN + payload.len());
        contents.extend_from_slice(&encode_expiry(entry.expiry()));
        contents.extend_from_slice(&payload);
        let bytes = frame(contents);

        let file_name = file_name_for(key);
        let _guard = self.lock_for(&file_name).lock().await;
        self.write_atomically(&self.directory.join(&file_name), &bytes)
            .await?;
        self.index.insert(file_name, entry.expiry());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.delete_entry(&file_name_for(key)).await
    }

    async fn flush(&self) -> Result<()> {
        let mut file_names: HashSet<String> =
            self.index.iter().map(|e| e.key().clone()).collect();
        file_names.extend(self.list_entry_files().await?);

        let mut first_error = None;
        for file_name in file_names {
            if let Err(e) = self.delete_entry(&file_name).await {
                warn!("Failed to delete cache file {}: {}", file_name, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<String> = self
            .index
            .iter()
            .filter(|e| *e.value() <= now)
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        let mut first_error = None;
        for file_name in expired {
            let _guard = self.lock_for(&file_name).lock().await;
            // A concurrent set may have rewritten the file since the scan.
            if !self.index.get(&file_name).is_some_and(|e| *e <= now) {
                continue;
            }
            match self.delete_file(&file_name).await {
                Ok(()) => {
                    self.index.remove(&file_name);
                    removed += 1;
                }
                Err(e) => {
                    warn!("Failed to delete expired cache file {}: {}", file_name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(
            "File layer at {} removed {} expired entries",
            self.directory.display(),
            removed
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}

fn file_name_for(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION)
}

fn encode_expiry(expiry: DateTime<Utc>) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..8].copy_from_slice(&expiry.timestamp().to_be_bytes());
    header[8..].copy_from_slice(&expiry.timestamp_subsec_nanos().to_be_bytes());
    header
}

fn decode_expiry(header: &[u8; HEADER_LEN]) -> Option<DateTime<Utc>> {
    let (seconds, nanos) = header.split_at(8);
    let seconds = i64::from_be_bytes(seconds.try_into().ok()?);
    let nanos = u32::from_be_bytes(nanos.try_into().ok()?);
    DateTime::from_timestamp(seconds, nanos)
}

async fn read_expiry(path: &Path) -> Result<DateTime<Utc>> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| storage_error("open", path, e))?;
    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)
        .await
        .map_err(|e| storage_error("read header of", path, e))?;

    decode_expiry(&header).ok_or_else(|| {
        CoreError::SerializationError(format!("invalid expiry header in {}", path.display()))
    })
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> CoreError {
    CoreError::StorageUnavailable(format!("failed to {} {}: {}", action, path.display(), e))
}

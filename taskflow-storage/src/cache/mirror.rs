//! Durable mirror of the in-memory store.
//!
//! The mirror lets a restarted process show last-known data before its first
//! fetch completes. It is strictly best effort: the store logs mirror
//! failures and carries on.
//!
//! # Entry Format
//!
//! `[fetched_at: 8 bytes, little-endian millis][json value]`

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::DateTime;
use serde::{de::DeserializeOwned, Serialize};
use taskflow_core::MirrorError;

use super::freshness::CacheEntry;

const TIMESTAMP_LEN: usize = 8;

/// Byte-level key/value persistence.
///
/// Operations are synchronous: the store calls them while applying a write,
/// and a write never suspends halfway.
pub trait DurableMirror: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, MirrorError>;

    fn set(&self, key: &str, bytes: &[u8]) -> Result<(), MirrorError>;

    fn remove(&self, key: &str) -> Result<(), MirrorError>;

    /// Remove every entry.
    fn clear(&self) -> Result<(), MirrorError>;
}

/// Encode an entry for the mirror.
pub fn encode_entry<V: Serialize>(entry: &CacheEntry<V>) -> Result<Vec<u8>, MirrorError> {
    let value_bytes = serde_json::to_vec(&entry.value)?;
    let mut bytes = Vec::with_capacity(TIMESTAMP_LEN + value_bytes.len());
    bytes.extend_from_slice(&entry.fetched_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&value_bytes);
    Ok(bytes)
}

/// Decode an entry written by [`encode_entry`].
pub fn decode_entry<V: DeserializeOwned>(bytes: &[u8]) -> Result<CacheEntry<V>, MirrorError> {
    if bytes.len() < TIMESTAMP_LEN {
        return Err(MirrorError::Serialization {
            reason: format!("entry too short: {} bytes", bytes.len()),
        });
    }
    let mut timestamp_bytes = [0u8; TIMESTAMP_LEN];
    timestamp_bytes.copy_from_slice(&bytes[..TIMESTAMP_LEN]);
    let millis = i64::from_le_bytes(timestamp_bytes);
    let fetched_at =
        DateTime::from_timestamp_millis(millis).ok_or_else(|| MirrorError::Serialization {
            reason: format!("invalid timestamp: {}", millis),
        })?;
    let value = serde_json::from_slice(&bytes[TIMESTAMP_LEN..])?;
    Ok(CacheEntry::new(value, fetched_at))
}

/// Process-local mirror, used in tests and when no mirror path is configured.
#[derive(Debug, Default)]
pub struct InMemoryMirror {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableMirror for InMemoryMirror {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, MirrorError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, bytes: &[u8]) -> Result<(), MirrorError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MirrorError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), MirrorError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_entry_keeps_millisecond_timestamp() {
        let fetched_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let entry = CacheEntry::new(vec!["a".to_string(), "b".to_string()], fetched_at);

        let bytes = encode_entry(&entry).unwrap();
        let decoded: CacheEntry<Vec<String>> = decode_entry(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_decode_rejects_truncated_entry() {
        let err = decode_entry::<u32>(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, MirrorError::Serialization { .. }));
    }

    #[test]
    fn test_decode_rejects_garbage_value() {
        let mut bytes = 0i64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"not json");
        assert!(decode_entry::<u32>(&bytes).is_err());
    }

    #[test]
    fn test_in_memory_mirror_operations() {
        let mirror = InMemoryMirror::new();
        mirror.set("taskflow:a", b"1").unwrap();
        mirror.set("taskflow:b", b"2").unwrap();
        assert_eq!(mirror.get("taskflow:a").unwrap(), Some(b"1".to_vec()));

        mirror.remove("taskflow:a").unwrap();
        assert_eq!(mirror.get("taskflow:a").unwrap(), None);

        mirror.clear().unwrap();
        assert!(mirror.is_empty());
    }
}

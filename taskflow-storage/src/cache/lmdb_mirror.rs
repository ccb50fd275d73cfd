//! LMDB-backed durable mirror.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep a copy of every cache
//! entry on disk, so a restarted client can render last-known data while its
//! first fetches are still in flight.
//!
//! Keys are the UTF-8 bytes of [`StoreKey::mirror_key`](super::key::StoreKey).
//! Values use the entry format described in [`super::mirror`].

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use taskflow_core::MirrorError;

use super::mirror::DurableMirror;

/// Default map size when the caller does not configure one.
pub const DEFAULT_MAX_SIZE_MB: usize = 64;

/// LMDB-backed mirror.
///
/// # Example
///
/// ```ignore
/// use taskflow_storage::cache::{LmdbMirror, DurableMirror};
///
/// let mirror = LmdbMirror::open("/home/me/.cache/taskflow", 64)?;
/// mirror.set("taskflow:anon:identity:ab12", &bytes)?;
/// ```
pub struct LmdbMirror {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbMirror {
    /// Open (or create) a mirror in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, MirrorError> {
        std::fs::create_dir_all(&path).map_err(|e| MirrorError::Io {
            reason: e.to_string(),
        })?;

        // SAFETY: the environment is opened once per directory by this
        // process and never remapped while transactions are live.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb.max(1) * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| MirrorError::Open {
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(transaction)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| MirrorError::Open {
                reason: e.to_string(),
            })?;
        wtxn.commit().map_err(transaction)?;

        Ok(Self { env, db })
    }

    /// Number of entries currently persisted.
    pub fn len(&self) -> Result<u64, MirrorError> {
        let rtxn = self.env.read_txn().map_err(transaction)?;
        self.db.len(&rtxn).map_err(transaction)
    }

    pub fn is_empty(&self) -> Result<bool, MirrorError> {
        Ok(self.len()? == 0)
    }
}

fn transaction(e: heed::Error) -> MirrorError {
    MirrorError::Transaction {
        reason: e.to_string(),
    }
}

impl DurableMirror for LmdbMirror {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, MirrorError> {
        let rtxn = self.env.read_txn().map_err(transaction)?;
        let bytes = self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(transaction)?
            .map(<[u8]>::to_vec);
        Ok(bytes)
    }

    fn set(&self, key: &str, bytes: &[u8]) -> Result<(), MirrorError> {
        let mut wtxn = self.env.write_txn().map_err(transaction)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), bytes)
            .map_err(transaction)?;
        wtxn.commit().map_err(transaction)
    }

    fn remove(&self, key: &str) -> Result<(), MirrorError> {
        let mut wtxn = self.env.write_txn().map_err(transaction)?;
        self.db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(transaction)?;
        wtxn.commit().map_err(transaction)
    }

    fn clear(&self) -> Result<(), MirrorError> {
        let mut wtxn = self.env.write_txn().map_err(transaction)?;
        self.db.clear(&mut wtxn).map_err(transaction)?;
        wtxn.commit().map_err(transaction)
    }
}

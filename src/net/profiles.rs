//! Persistent, ordered list of network profiles.
//!
//! Profiles live in a flat key/value namespace so the same layout works on a
//! device's non-volatile storage and on a host file:
//!
//! | Key | Value |
//! |-----|-------|
//! | `count` | number of stored profiles |
//! | `name_<i>` | network name of slot `i` |
//! | `cred_<i>` | credential of slot `i` |
//!
//! [`ProfileStore`] keeps insertion order, updates by name in place and
//! refuses to grow past its slot count.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Longest accepted network name, in characters.
pub const MAX_NAME_LEN: usize = 32;

const COUNT_KEY: &str = "count";

fn name_key(slot: usize) -> String {
    format!("name_{slot}")
}

fn cred_key(slot: usize) -> String {
    format!("cred_{slot}")
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read profile store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write profile store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("profile store {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
}

// ---------------------------------------------------------------------------
// KeyValueStore
// ---------------------------------------------------------------------------

/// Minimal persistent string map.  Every successful `set` is durable.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Volatile store, for tests and for running without a writable disk.
#[derive(Debug, Default, Clone)]
pub struct MemoryKvStore {
    entries: BTreeMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// TOML file holding one flat table, rewritten on every `set`.
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileKvStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| StoreError::Read {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    fn persist(&self) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string(&self.entries).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&self.path, content).map_err(write_err)
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let previous = self.entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist() {
            // keep memory and disk in agreement
            match previous {
                Some(old) => self.entries.insert(key.to_string(), old),
                None => self.entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NetworkProfile
// ---------------------------------------------------------------------------

/// One stored network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    pub name: String,
    pub credential: String,
    /// Slot index, i.e. insertion order.
    pub position: usize,
}

// ---------------------------------------------------------------------------
// ProfileStore
// ---------------------------------------------------------------------------

/// Ordered network profiles over any [`KeyValueStore`].
pub struct ProfileStore<S: KeyValueStore> {
    kv: S,
    max_slots: usize,
}

impl<S: KeyValueStore> ProfileStore<S> {
    pub fn new(kv: S, max_slots: usize) -> Self {
        Self { kv, max_slots }
    }

    /// Stored profile count, clamped to the slot count.
    pub fn count(&self) -> usize {
        self.kv
            .get(COUNT_KEY)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0)
            .min(self.max_slots)
    }

    /// Snapshot of all profiles in insertion order.
    ///
    /// A slot whose name is missing is skipped; the rest are still returned.
    pub fn list(&self) -> Vec<NetworkProfile> {
        (0..self.count())
            .filter_map(|position| {
                let name = self.kv.get(&name_key(position))?;
                let credential = self.kv.get(&cred_key(position)).unwrap_or_default();
                Some(NetworkProfile {
                    name,
                    credential,
                    position,
                })
            })
            .collect()
    }

    /// Write `defaults` only if nothing is stored yet.
    ///
    /// Returns `Ok(true)` when it seeded.  Entries beyond the slot count or
    /// with invalid names are skipped with a warning.
    pub fn seed_defaults_if_empty<'a, I>(&mut self, defaults: I) -> Result<bool, StoreError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if self.count() != 0 {
            return Ok(false);
        }
        let mut written = 0usize;
        for (name, credential) in defaults {
            if !valid_name(name) {
                log::warn!("profiles: skipping default with invalid name {name:?}");
                continue;
            }
            if written == self.max_slots {
                log::warn!("profiles: more defaults than slots, dropping {name:?}");
                continue;
            }
            self.write_slot(written, name, credential)?;
            written += 1;
            self.kv.set(COUNT_KEY, &written.to_string())?;
        }
        if written > 0 {
            log::info!("profiles: seeded {written} default network(s)");
        }
        Ok(written > 0)
    }

    /// Update the credential of `name`, or append a new profile.
    ///
    /// Returns `false` when the name is empty or too long, when the store is
    /// full and `name` is new, or when the write fails.
    pub fn upsert(&mut self, name: &str, credential: &str) -> bool {
        if !valid_name(name) {
            log::warn!("profiles: rejected name {name:?}");
            return false;
        }

        let count = self.count();
        let existing = (0..count).find(|&i| self.kv.get(&name_key(i)).as_deref() == Some(name));

        let result = match existing {
            Some(slot) => self.kv.set(&cred_key(slot), credential),
            None if count >= self.max_slots => {
                log::warn!("profiles: store full ({count} slots), cannot add {name:?}");
                return false;
            }
            None => self
                .write_slot(count, name, credential)
                .and_then(|()| self.kv.set(COUNT_KEY, &(count + 1).to_string())),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                log::error!("profiles: failed to persist {name:?}: {e}");
                false
            }
        }
    }

    fn write_slot(&mut self, slot: usize, name: &str, credential: &str) -> Result<(), StoreError> {
        self.kv.set(&name_key(slot), name)?;
        self.kv.set(&cred_key(slot), credential)
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().count() <= MAX_NAME_LEN
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

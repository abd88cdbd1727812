//! Backing key-value store contract and the RAM adapter.
//!
//! The flash driver itself lives in the firmware crate; this module only
//! defines the narrow byte-blob interface a [`Store`](crate::store::Store)
//! needs, NVS-style: short ASCII keys inside one namespace, `get`/`put`/
//! `erase` of raw blobs, and an explicit `flush` to make a batch of puts
//! durable.

use thiserror_no_std::Error;

/// Maximum key (and namespace name) length, matching the NVS 15-character
/// limit.
pub const MAX_KEY_LEN: usize = 15;

/// Maximum stored blob length: a full text slot.
pub const MAX_VALUE_LEN: usize = crate::value::MAX_ENCODED_LEN;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvError {
    /// The key has never been written. Callers treat this as "use the
    /// default", not as a failure.
    #[error("key not found")]
    NotFound,
    #[error("key too long or not ASCII")]
    InvalidKey,
    #[error("store is out of space")]
    Full,
    #[error("backing store failure")]
    Backend,
}

/// One flash-resident key-value namespace.
///
/// Implementations must distinguish [`KvError::NotFound`] from other
/// failures; everything else is best-effort from the store's point of view.
pub trait KvStore {
    /// Read the blob at `key` into `buf`, returning the blob length.
    fn get(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, KvError>;

    /// Write (insert or overwrite) the blob at `key`.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn erase(&mut self, key: &str) -> Result<(), KvError>;

    /// Remove every key in the namespace.
    fn erase_all(&mut self) -> Result<(), KvError>;

    /// Make the puts since the last flush durable.
    fn flush(&mut self) -> Result<(), KvError>;
}

impl<T: KvStore> KvStore for &mut T {
    fn get(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, KvError> {
        (**self).get(key, buf)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), KvError> {
        (**self).put(key, value)
    }

    fn erase(&mut self, key: &str) -> Result<(), KvError> {
        (**self).erase(key)
    }

    fn erase_all(&mut self) -> Result<(), KvError> {
        (**self).erase_all()
    }

    fn flush(&mut self) -> Result<(), KvError> {
        (**self).flush()
    }
}

const MEM_KV_ENTRIES: usize = 32;

struct MemEntry {
    key: heapless::String<MAX_KEY_LEN>,
    value: heapless::Vec<u8, MAX_VALUE_LEN>,
}

/// RAM-only [`KvStore`]: a linear-scan entry table.
///
/// Used by host tests and by devices running without provisioned flash.
/// Tracks how many puts and flushes it has seen so tests can assert that
/// non-persistent slots never reach the backing store.
#[derive(Default)]
pub struct MemKv {
    entries: heapless::Vec<MemEntry, MEM_KV_ENTRIES>,
    puts: usize,
    flushes: usize,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `put` calls observed.
    pub fn puts(&self) -> usize {
        self.puts
    }

    /// Total number of `flush` calls observed.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    fn check_key(key: &str) -> Result<(), KvError> {
        if key.is_empty() || key.len() > MAX_KEY_LEN || !key.is_ascii() {
            return Err(KvError::InvalidKey);
        }
        Ok(())
    }

    fn find(&mut self, key: &str) -> Option<&mut MemEntry> {
        self.entries.iter_mut().find(|e| e.key.as_str() == key)
    }
}

impl KvStore for MemKv {
    fn get(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, KvError> {
        Self::check_key(key)?;
        let entry = self.find(key).ok_or(KvError::NotFound)?;
        let len = entry.value.len();
        if buf.len() < len {
            return Err(KvError::Backend);
        }
        buf[..len].copy_from_slice(&entry.value);
        Ok(len)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), KvError> {
        Self::check_key(key)?;
        self.puts += 1;
        let blob = heapless::Vec::from_slice(value).map_err(|_| KvError::Full)?;
        if let Some(entry) = self.find(key) {
            entry.value = blob;
            return Ok(());
        }
        let entry = MemEntry {
            key: heapless::String::try_from(key).map_err(|_| KvError::InvalidKey)?,
            value: blob,
        };
        self.entries.push(entry).map_err(|_| KvError::Full)
    }

    fn erase(&mut self, key: &str) -> Result<(), KvError> {
        Self::check_key(key)?;
        if let Some(pos) = self.entries.iter().position(|e| e.key.as_str() == key) {
            self.entries.swap_remove(pos);
        }
        Ok(())
    }

    fn erase_all(&mut self) -> Result<(), KvError> {
        self.entries.clear();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), KvError> {
        self.flushes += 1;
        Ok(())
    }
}

//! Per-connection delta cache.
//!
//! The cache is owned by the connection driver and never touched
//! concurrently by more than one task, but it's backed by a `DashMap`
//! anyway so a second task (a status printer, a metrics poller) can read
//! it without coordinating with the driver.

use std::sync::Arc;

use dashmap::DashMap;

use crate::value::{DecodedRecord, KeyTuple};

type CacheKey = (u16, KeyTuple);

/// Per-connection store of the last fully decoded record for each
/// `(packet_type, key_tuple)`.
#[derive(Debug, Clone)]
pub struct DeltaCache {
    entries: Arc<DashMap<CacheKey, DecodedRecord>>,
}

impl DeltaCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Returns an owned copy of the cached record, never a reference into
    /// the map's internal storage.
    pub fn get(&self, packet_type: u16, key: &KeyTuple) -> Option<DecodedRecord> {
        self.entries.get(&(packet_type, key.clone())).map(|entry| entry.value().clone())
    }

    /// Stores an independent copy of `record` under `(packet_type, key)`.
    pub fn put(&self, packet_type: u16, key: KeyTuple, record: DecodedRecord) {
        self.entries.insert((packet_type, key), record);
    }

    pub fn clear_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DeltaCache {
    fn default() -> Self {
        Self::new()
    }
}

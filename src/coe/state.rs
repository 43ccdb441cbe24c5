//! # Block-State Store
//!
//! Keyed cache of the last-known full contents of every addressable
//! block. Upstream producers write one channel at a time, but the wire
//! transfers whole 4-channel or 16-channel blocks; this store is what
//! lets a partial write be merged into a full block without clobbering
//! sibling channels.
//!
//! The store owns the canonical arrays: `get` returns an owned copy and
//! `set` stores an owned copy, so no caller ever holds a live reference
//! into the cache. Entries are seeded to all-zero on first access, live
//! for the process lifetime and are never deleted; merging is the
//! scheduler's job, layered on top of plain get/set.

use crate::coe::frame::{BlockData, DataKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The granularity at which state is cached and writes are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub node: u8,
    pub block: u8,
    pub kind: DataKind,
}

impl CacheKey {
    pub fn new(node: u8, block: u8, kind: DataKind) -> Self {
        CacheKey { node, block, kind }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.node, self.block, self.kind)
    }
}

/// Last-known full block contents per cache key.
#[derive(Debug, Default)]
pub struct BlockStateStore {
    states: HashMap<CacheKey, BlockData>,
}

impl BlockStateStore {
    pub fn new() -> Self {
        BlockStateStore::default()
    }

    /// Returns an owned copy of the cached contents for the given key,
    /// zero-initialized when the key has never been written.
    pub fn get(&self, key: &CacheKey) -> BlockData {
        self.states
            .get(key)
            .copied()
            .unwrap_or_else(|| BlockData::zeroed(key.kind))
    }

    /// Replaces the cached contents for the given key with an owned copy
    /// of the input.
    pub fn set(&mut self, key: &CacheKey, data: BlockData) {
        debug_assert_eq!(data.kind(), key.kind);
        self.states.insert(*key, data);
    }

    /// Number of keys that have been written at least once.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

//! Bounded content cache of byte ranges.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────┐
//! │ slots: DashMap<NodeId, Slot> │      │ recency: Mutex<Recency>  │
//! │                              │      │                          │
//! │  f1 ─► Mutex<FileSlot>       │      │  LruCache<EntryKey, len> │
//! │         BTreeMap<start, E>   │      │  used bytes              │
//! │  f2 ─► Mutex<FileSlot>       │      └──────────────────────────┘
//! └──────────────────────────────┘                  │
//!               ▲                                   │ pop_lru()
//!               └──────────── evict ────────────────┘
//! ```
//!
//! Each file has its own guarded slot, so puts and reads on different
//! files never contend. The recency index is global and only touched for
//! bookkeeping. Lock order is slot then recency; eviction pops a victim
//! from the index and releases it before locking the victim's slot.
//!
//! Entries of one file never overlap and share one revision. A put removes
//! every overlapping entry and inserts the new one, unless an existing
//! entry already covers it. A put at another revision is dropped: only
//! [`ContentCache::invalidate`] retires a revision. Invalidation also bumps
//! the file's generation, so a fetch that started before it cannot land
//! after it. Reads return a `Bytes` view, so evicting an entry never
//! disturbs a reader that already holds its bytes.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use dashmap::DashMap;
use lru::LruCache;
use vaultspace_core::domain::{ByteRange, CacheEntry, NodeId, RevisionTag};

use crate::disk::DiskStore;

/// Identifies one stored entry in the recency index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    file_id: NodeId,
    start: u64,
    seq: u64,
}

struct StoredEntry {
    entry: CacheEntry,
    seq: u64,
}

#[derive(Default)]
struct FileSlot {
    entries: BTreeMap<u64, StoredEntry>,
    generation: u64,
}

impl FileSlot {
    fn covering(&self, wanted: &ByteRange) -> Option<&StoredEntry> {
        self.entries
            .range(..=wanted.start())
            .next_back()
            .map(|(_, stored)| stored)
            .filter(|stored| stored.entry.range.contains(wanted))
    }

    fn overlapping(&self, range: &ByteRange) -> Vec<u64> {
        self.entries
            .range(..range.end())
            .filter(|(_, stored)| stored.entry.range.overlaps(range))
            .map(|(start, _)| *start)
            .collect()
    }
}

struct Recency {
    lru: LruCache<EntryKey, u64>,
    used: u64,
}

impl Recency {
    fn forget(&mut self, key: &EntryKey) {
        if let Some(len) = self.lru.pop(key) {
            self.used -= len;
        }
    }
}

/// Current occupancy of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheUsage {
    /// Bytes held in memory
    pub used_bytes: u64,
    /// Configured budget
    pub max_bytes: u64,
    /// Number of entries
    pub entries: usize,
}

/// Bounded, byte-budgeted store of cached file ranges
pub struct ContentCache {
    slots: DashMap<NodeId, Arc<Mutex<FileSlot>>>,
    recency: Mutex<Recency>,
    max_bytes: u64,
    next_seq: AtomicU64,
    disk: Option<DiskStore>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Critical sections only insert or remove whole entries, so a poisoned
    // lock still guards consistent data.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ContentCache {
    /// An in-memory cache with a total byte budget
    pub fn new(max_bytes: u64) -> Self {
        Self {
            slots: DashMap::new(),
            recency: Mutex::new(Recency {
                lru: LruCache::unbounded(),
                used: 0,
            }),
            max_bytes,
            next_seq: AtomicU64::new(0),
            disk: None,
        }
    }

    /// A cache mirrored to `dir`
    ///
    /// Files left by an earlier run are pruned oldest-first to the budget
    /// and read back lazily on memory misses.
    pub fn with_disk(max_bytes: u64, dir: &Path) -> std::io::Result<Self> {
        let disk = DiskStore::new(dir)?;
        disk.prune(max_bytes)?;
        Ok(Self {
            disk: Some(disk),
            ..Self::new(max_bytes)
        })
    }

    fn slot(&self, file_id: &NodeId) -> Arc<Mutex<FileSlot>> {
        self.slots
            .entry(file_id.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Cached bytes for `wanted`, or `None` on a miss
    ///
    /// Only an entry at `revision` that covers the whole range counts as a
    /// hit.
    pub fn read(&self, file_id: &NodeId, wanted: ByteRange, revision: &RevisionTag) -> Option<Bytes> {
        if let Some(slot) = self.slots.get(file_id).map(|s| s.value().clone()) {
            let guard = lock(&slot);
            if let Some(stored) = guard.covering(&wanted) {
                if &stored.entry.revision == revision {
                    return stored.entry.slice(&wanted);
                }
            }
        }

        let (range, data) = self.disk.as_ref()?.load_covering(file_id, revision, wanted)?;
        let entry = CacheEntry::new(file_id.clone(), range, data, revision.clone()).ok()?;
        let bytes = entry.slice(&wanted);
        tracing::trace!(
            file_id = %file_id,
            start = range.start(),
            end = range.end(),
            "Loaded range from disk"
        );
        self.insert(entry, None, false);
        bytes
    }

    /// Current generation of a file's entries, bumped by every invalidation
    pub fn generation(&self, file_id: &NodeId) -> u64 {
        lock(&self.slot(file_id)).generation
    }

    /// Stores a range, evicting older entries if over budget
    ///
    /// Dropped when the file holds entries of another revision.
    pub fn put(&self, entry: CacheEntry) {
        self.insert(entry, None, true);
    }

    /// Stores a range fetched while the file was at `generation`
    ///
    /// Dropped when the file was invalidated since.
    pub fn put_at_generation(&self, entry: CacheEntry, generation: u64) {
        self.insert(entry, Some(generation), true);
    }

    fn insert(&self, entry: CacheEntry, generation: Option<u64>, persist: bool) {
        let len = entry.len();
        if entry.is_empty() || len > self.max_bytes {
            tracing::debug!(file_id = %entry.file_id, bytes = len, "Range not cacheable");
            return;
        }

        let file_id = entry.file_id.clone();
        let range = entry.range;
        let slot = self.slot(&file_id);
        {
            let mut guard = lock(&slot);
            if generation.is_some_and(|g| g != guard.generation) {
                tracing::debug!(
                    file_id = %file_id,
                    revision = %entry.revision,
                    "Range fetched before invalidation not cached"
                );
                return;
            }
            if let Some(other) = guard
                .entries
                .values()
                .find(|stored| stored.entry.revision != entry.revision)
            {
                tracing::debug!(
                    file_id = %file_id,
                    revision = %entry.revision,
                    cached = %other.entry.revision,
                    "Range of another revision not cached"
                );
                return;
            }

            if guard.covering(&range).is_some() {
                return;
            }

            let replaced = guard.overlapping(&range);
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let mut removed = Vec::with_capacity(replaced.len());
            let mut recency = lock(&self.recency);
            for start in replaced {
                if let Some(old) = guard.entries.remove(&start) {
                    recency.forget(&EntryKey {
                        file_id: file_id.clone(),
                        start,
                        seq: old.seq,
                    });
                    removed.push(old.entry);
                }
            }
            recency.lru.push(
                EntryKey {
                    file_id: file_id.clone(),
                    start: range.start(),
                    seq,
                },
                len,
            );
            recency.used += len;
            drop(recency);

            if let Some(disk) = &self.disk {
                for old in &removed {
                    disk.remove(&file_id, &old.revision, old.range);
                }
                if persist {
                    disk.store(&file_id, &entry.revision, range, &entry.data);
                }
            }
            guard.entries.insert(range.start(), StoredEntry { entry, seq });
        }

        tracing::trace!(file_id = %file_id, start = range.start(), end = range.end(), "Cached range");
        self.evict();
    }

    /// Removes entries until the budget holds, least recently fetched first
    fn evict(&self) {
        loop {
            let victim = {
                let mut recency = lock(&self.recency);
                if recency.used <= self.max_bytes {
                    return;
                }
                match recency.lru.pop_lru() {
                    Some((key, len)) => {
                        recency.used -= len;
                        key
                    }
                    None => return,
                }
            };

            let Some(slot) = self.slots.get(&victim.file_id).map(|s| s.value().clone()) else {
                continue;
            };
            let mut guard = lock(&slot);
            let matches = guard
                .entries
                .get(&victim.start)
                .is_some_and(|stored| stored.seq == victim.seq);
            if matches {
                if let Some(old) = guard.entries.remove(&victim.start) {
                    if let Some(disk) = &self.disk {
                        disk.remove(&victim.file_id, &old.entry.revision, old.entry.range);
                    }
                    tracing::trace!(
                        file_id = %victim.file_id,
                        start = victim.start,
                        bytes = old.entry.len(),
                        "Evicted cached range"
                    );
                }
            }
        }
    }

    fn clear_slot(&self, file_id: &NodeId, slot: &Mutex<FileSlot>) -> u64 {
        let mut guard = lock(slot);
        guard.generation += 1;
        let mut recency = lock(&self.recency);
        let mut freed = 0;
        for (start, old) in std::mem::take(&mut guard.entries) {
            freed += old.entry.len();
            recency.forget(&EntryKey {
                file_id: file_id.clone(),
                start,
                seq: old.seq,
            });
        }
        freed
    }

    /// Drops every entry of a file, in memory and on disk
    ///
    /// Returns the number of bytes released from memory.
    pub fn invalidate(&self, file_id: &NodeId) -> u64 {
        let freed = self.clear_slot(file_id, &self.slot(file_id));
        if let Some(disk) = &self.disk {
            disk.remove_file(file_id);
        }

        tracing::debug!(file_id = %file_id, freed, "Invalidated cached content");
        freed
    }

    /// Drops everything, in memory and on disk
    pub fn clear(&self) -> std::io::Result<()> {
        let slots: Vec<(NodeId, Arc<Mutex<FileSlot>>)> = self
            .slots
            .iter()
            .map(|s| (s.key().clone(), s.value().clone()))
            .collect();
        let freed: u64 = slots
            .iter()
            .map(|(file_id, slot)| self.clear_slot(file_id, slot))
            .sum();
        if let Some(disk) = &self.disk {
            disk.wipe()?;
        }

        tracing::info!(freed, "Content cache cleared");
        Ok(())
    }

    /// Ranges currently held for a file, ordered by start
    pub fn ranges(&self, file_id: &NodeId) -> Vec<ByteRange> {
        self.slots
            .get(file_id)
            .map(|slot| {
                lock(slot.value())
                    .entries
                    .values()
                    .map(|stored| stored.entry.range)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Occupancy snapshot
    pub fn usage(&self) -> CacheUsage {
        let recency = lock(&self.recency);
        CacheUsage {
            used_bytes: recency.used,
            max_bytes: self.max_bytes,
            entries: recency.lru.len(),
        }
    }

    /// Bytes mirrored on disk, if persistence is enabled
    pub fn disk_usage(&self) -> Option<u64> {
        self.disk.as_ref().and_then(|d| d.disk_usage().ok())
    }
}

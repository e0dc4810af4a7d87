//! Cached byte ranges
//!
//! A `CacheEntry` holds one contiguous, half-open range of a file's
//! content at a specific revision. Entries are immutable: a newer fetch
//! replaces an entry wholesale instead of patching it.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::errors::DomainError;
use super::newtypes::{NodeId, RevisionTag};

/// Half-open byte interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// Creates a range
    ///
    /// # Errors
    /// Returns `DomainError::InvalidRange` if `start > end`.
    pub fn new(start: u64, end: u64) -> Result<Self, DomainError> {
        if start > end {
            return Err(DomainError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Inclusive start
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive end
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// True for zero-length ranges
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `other` lies entirely inside this range
    #[must_use]
    pub fn contains(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether the two ranges share at least one byte
    #[must_use]
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Clamps the end to `limit`
    #[must_use]
    pub fn clamp_end(&self, limit: u64) -> ByteRange {
        let end = self.end.min(limit);
        ByteRange {
            start: self.start.min(end),
            end,
        }
    }
}

/// One cached range of a file's content
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// File the bytes belong to
    pub file_id: NodeId,
    /// Range covered by `data`
    pub range: ByteRange,
    /// Owned, reference-counted buffer
    pub data: Bytes,
    /// When the bytes were fetched
    pub fetched_at: DateTime<Utc>,
    /// Revision of the file at fetch time
    pub revision: RevisionTag,
}

impl CacheEntry {
    /// Builds an entry, checking that the buffer length matches the range
    ///
    /// # Errors
    /// Returns `DomainError::InvalidRange` if the buffer and range disagree.
    pub fn new(
        file_id: NodeId,
        range: ByteRange,
        data: Bytes,
        revision: RevisionTag,
    ) -> Result<Self, DomainError> {
        if data.len() as u64 != range.len() {
            return Err(DomainError::InvalidRange {
                start: range.start(),
                end: range.start() + data.len() as u64,
            });
        }
        Ok(Self {
            file_id,
            range,
            data,
            fetched_at: Utc::now(),
            revision,
        })
    }

    /// Size of the buffer in bytes
    #[must_use]
    pub fn len(&self) -> u64 {
        self.range.len()
    }

    /// True for an empty buffer
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Zero-copy view of `wanted`, if this entry covers it
    #[must_use]
    pub fn slice(&self, wanted: &ByteRange) -> Option<Bytes> {
        if !self.range.contains(wanted) {
            return None;
        }
        let from = (wanted.start() - self.range.start()) as usize;
        let to = (wanted.end() - self.range.start()) as usize;
        Some(self.data.slice(from..to))
    }
}

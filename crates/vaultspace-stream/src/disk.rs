//! On-disk mirror of cached ranges.
//!
//! Layout: `{cache_dir}/content/{2 chars}/{rest of sha256(file id)}/{sha256(revision)[..16]}/{start}-{end}`
//!
//! The mirror is advisory. Every failure is logged and reported to the
//! caller as "not stored" or "not found"; nothing here can fail a read.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use vaultspace_core::domain::{ByteRange, NodeId, RevisionTag};

/// Hash-addressed range files under a cache directory
pub struct DiskStore {
    content_dir: PathBuf,
}

impl DiskStore {
    /// Opens the store, creating the content directory if needed
    pub fn new(cache_dir: &Path) -> std::io::Result<Self> {
        let content_dir = cache_dir.join("content");
        fs::create_dir_all(&content_dir)?;
        Ok(Self { content_dir })
    }

    fn hash(value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Directory holding every revision of a file
    pub fn file_dir(&self, file_id: &NodeId) -> PathBuf {
        let hash = Self::hash(file_id.as_str());
        let (prefix, rest) = hash.split_at(2);
        self.content_dir.join(prefix).join(rest)
    }

    fn revision_dir(&self, file_id: &NodeId, revision: &RevisionTag) -> PathBuf {
        let rev_hash = Self::hash(revision.as_str());
        self.file_dir(file_id).join(&rev_hash[..16])
    }

    fn range_path(&self, file_id: &NodeId, revision: &RevisionTag, range: ByteRange) -> PathBuf {
        self.revision_dir(file_id, revision)
            .join(format!("{}-{}", range.start(), range.end()))
    }

    fn parse_range(name: &str) -> Option<ByteRange> {
        let (start, end) = name.split_once('-')?;
        ByteRange::new(start.parse().ok()?, end.parse().ok()?).ok()
    }

    /// Writes a range, replacing any file with the same bounds
    ///
    /// Data goes to a `.partial` file first and is renamed into place; a
    /// failed write removes it.
    pub fn store(
        &self,
        file_id: &NodeId,
        revision: &RevisionTag,
        range: ByteRange,
        data: &[u8],
    ) -> bool {
        let path = self.range_path(file_id, revision, range);
        let partial = path.with_extension("partial");
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&partial)?;
            file.write_all(data)?;
            file.sync_data()?;
            fs::rename(&partial, &path)
        })();

        match result {
            Ok(()) => true,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                tracing::warn!(file_id = %file_id, error = %e, "Failed to persist cached range");
                false
            }
        }
    }

    /// Finds a stored range that covers `wanted` at `revision`
    pub fn load_covering(
        &self,
        file_id: &NodeId,
        revision: &RevisionTag,
        wanted: ByteRange,
    ) -> Option<(ByteRange, Bytes)> {
        let dir = self.revision_dir(file_id, revision);
        let entries = fs::read_dir(&dir).ok()?;

        let range = entries
            .filter_map(Result::ok)
            .filter_map(|e| Self::parse_range(e.file_name().to_str()?))
            .filter(|r| r.contains(&wanted))
            .max_by_key(ByteRange::len)?;

        match fs::read(dir.join(format!("{}-{}", range.start(), range.end()))) {
            Ok(data) if data.len() as u64 == range.len() => Some((range, Bytes::from(data))),
            Ok(_) => {
                tracing::warn!(file_id = %file_id, "Discarding truncated cache file");
                self.remove(file_id, revision, range);
                None
            }
            Err(e) => {
                tracing::debug!(file_id = %file_id, error = %e, "Cached range unreadable");
                None
            }
        }
    }

    /// Removes one stored range
    pub fn remove(&self, file_id: &NodeId, revision: &RevisionTag, range: ByteRange) {
        let path = self.range_path(file_id, revision, range);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
    }

    /// Removes every stored range of a file, all revisions
    pub fn remove_file(&self, file_id: &NodeId) {
        let dir = self.file_dir(file_id);
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                tracing::warn!(file_id = %file_id, error = %e, "Failed to remove cached file");
            }
        }
    }

    /// Removes everything
    pub fn wipe(&self) -> std::io::Result<()> {
        if self.content_dir.exists() {
            fs::remove_dir_all(&self.content_dir)?;
        }
        fs::create_dir_all(&self.content_dir)
    }

    /// Every stored range file with its size and modification time
    fn walk(&self) -> std::io::Result<Vec<(PathBuf, u64, SystemTime)>> {
        let mut files = Vec::new();
        let mut pending = vec![self.content_dir.clone()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    let metadata = entry.metadata()?;
                    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    files.push((entry.path(), metadata.len(), modified));
                }
            }
        }
        Ok(files)
    }

    /// Total bytes stored on disk
    pub fn disk_usage(&self) -> std::io::Result<u64> {
        Ok(self.walk()?.iter().map(|(_, len, _)| len).sum())
    }

    /// Deletes the oldest files until the total fits in `max_bytes`
    ///
    /// Returns the number of bytes freed.
    pub fn prune(&self, max_bytes: u64) -> std::io::Result<u64> {
        let mut files = self.walk()?;
        let mut total: u64 = files.iter().map(|(_, len, _)| len).sum();
        if total <= max_bytes {
            return Ok(0);
        }

        files.sort_by_key(|(_, _, modified)| *modified);
        let mut freed = 0;
        for (path, len, _) in files {
            if total <= max_bytes {
                break;
            }
            fs::remove_file(&path)?;
            total -= len;
            freed += len;
        }

        tracing::info!(freed, remaining = total, "Pruned on-disk content cache");
        Ok(freed)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn ids() -> (NodeId, RevisionTag) {
        (NodeId::new("f1").unwrap(), RevisionTag::new("r1").unwrap())
    }

    #[test]
    fn test_store_and_load_covering() {
        let dir = tempdir().unwrap();
        let disk = DiskStore::new(dir.path()).unwrap();
        let (id, rev) = ids();

        assert!(disk.store(&id, &rev, ByteRange::new(0, 10).unwrap(), b"0123456789"));

        let (range, data) = disk
            .load_covering(&id, &rev, ByteRange::new(2, 5).unwrap())
            .unwrap();
        assert_eq!(range, ByteRange::new(0, 10).unwrap());
        assert_eq!(&data[..], b"0123456789");

        assert!(disk
            .load_covering(&id, &rev, ByteRange::new(5, 12).unwrap())
            .is_none());
        let other = RevisionTag::new("r2").unwrap();
        assert!(disk
            .load_covering(&id, &other, ByteRange::new(0, 1).unwrap())
            .is_none());
    }

    #[test]
    fn test_failed_store_leaves_no_partial_file() {
        let dir = tempdir().unwrap();
        let disk = DiskStore::new(dir.path()).unwrap();
        let (id, rev) = ids();
        let range = ByteRange::new(0, 4).unwrap();
        let path = disk.range_path(&id, &rev, range);

        // A non-empty directory in the way makes the final rename fail
        fs::create_dir_all(path.join("blocker")).unwrap();
        assert!(!disk.store(&id, &rev, range, b"abcd"));
        assert!(!path.with_extension("partial").exists());
        assert!(path.is_dir());
    }

    #[test]
    fn test_cache_path_layout() {
        let dir = tempdir().unwrap();
        let disk = DiskStore::new(dir.path()).unwrap();
        let path = disk.file_dir(&NodeId::new("f1").unwrap());
        let prefix = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert_eq!(prefix.len(), 2);
        assert!(path.starts_with(dir.path().join("content")));
    }

    #[test]
    fn test_remove_file_and_usage() {
        let dir = tempdir().unwrap();
        let disk = DiskStore::new(dir.path()).unwrap();
        let (id, rev) = ids();
        disk.store(&id, &rev, ByteRange::new(0, 4).unwrap(), b"abcd");
        disk.store(&id, &rev, ByteRange::new(8, 10).unwrap(), b"ij");
        assert_eq!(disk.disk_usage().unwrap(), 6);

        disk.remove_file(&id);
        assert_eq!(disk.disk_usage().unwrap(), 0);
    }

    #[test]
    fn test_prune_to_budget() {
        let dir = tempdir().unwrap();
        let disk = DiskStore::new(dir.path()).unwrap();
        let (id, rev) = ids();
        for i in 0..4u64 {
            disk.store(
                &id,
                &rev,
                ByteRange::new(i * 10, i * 10 + 10).unwrap(),
                &[0u8; 10],
            );
        }

        assert_eq!(disk.prune(100).unwrap(), 0);
        assert_eq!(disk.prune(25).unwrap(), 20);
        assert_eq!(disk.disk_usage().unwrap(), 20);
    }

    #[test]
    fn test_wipe() {
        let dir = tempdir().unwrap();
        let disk = DiskStore::new(dir.path()).unwrap();
        let (id, rev) = ids();
        disk.store(&id, &rev, ByteRange::new(0, 1).unwrap(), b"x");
        disk.wipe().unwrap();
        assert_eq!(disk.disk_usage().unwrap(), 0);
    }
}

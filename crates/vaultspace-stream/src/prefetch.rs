//! Fetch sizing for sequential playback.

use vaultspace_core::config::StreamingConfig;

/// Decides how many bytes to fetch past a cache miss
///
/// With a bitrate hint the chunk covers `seconds` of playback, clamped to
/// `[min_bytes, max_bytes]`. Without one the minimum is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchPolicy {
    pub min_bytes: u64,
    pub max_bytes: u64,
    pub seconds: u64,
}

impl Default for PrefetchPolicy {
    fn default() -> Self {
        Self::from(&StreamingConfig::default())
    }
}

impl From<&StreamingConfig> for PrefetchPolicy {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            min_bytes: config.min_prefetch_bytes,
            max_bytes: config.max_prefetch_bytes.max(config.min_prefetch_bytes),
            seconds: config.prefetch_seconds,
        }
    }
}

impl PrefetchPolicy {
    /// Chunk size for a reader with an optional bitrate in bytes per second
    #[must_use]
    pub fn chunk_for(&self, bytes_per_sec: Option<u64>) -> u64 {
        match bytes_per_sec {
            Some(rate) if rate > 0 => rate
                .saturating_mul(self.seconds)
                .clamp(self.min_bytes, self.max_bytes),
            _ => self.min_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;

    #[test]
    fn test_defaults_match_config() {
        let policy = PrefetchPolicy::default();
        assert_eq!(policy.min_bytes, 256 * KIB);
        assert_eq!(policy.max_bytes, 8 * MIB);
        assert_eq!(policy.seconds, 5);
    }

    #[test]
    fn test_chunk_without_hint_is_minimum() {
        let policy = PrefetchPolicy::default();
        assert_eq!(policy.chunk_for(None), 256 * KIB);
        assert_eq!(policy.chunk_for(Some(0)), 256 * KIB);
    }

    #[test]
    fn test_chunk_scales_with_bitrate() {
        let policy = PrefetchPolicy::default();
        // 320 kbit/s audio: 40 KiB/s for 5 s is below the minimum
        assert_eq!(policy.chunk_for(Some(40 * KIB)), 256 * KIB);
        // 8 Mbit/s video: 1 MiB/s for 5 s
        assert_eq!(policy.chunk_for(Some(MIB)), 5 * MIB);
        // 4K video saturates the maximum
        assert_eq!(policy.chunk_for(Some(10 * MIB)), 8 * MIB);
        assert_eq!(policy.chunk_for(Some(u64::MAX)), 8 * MIB);
    }
}

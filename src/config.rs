//! Store configuration.
//!
//! [`StoreConfig`] is a plain struct with defaults and a `validate` pass.
//! [`StoreConfig::from_options`] builds one from string options as a
//! streaming engine would pass them: keys are case-insensitive and may carry
//! a `stateStore.` prefix; unknown keys are ignored.

use std::collections::HashMap;

use tracing::debug;

use crate::error::StoreError;

const OPTION_PREFIX: &str = "statestore.";
const MB: usize = 1024 * 1024;

/// Block compression applied to engine data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionCodec {
    /// Blocks are stored as-is.
    #[default]
    Uncompressed,
    /// Blocks are zstd-compressed.
    Zstd,
}

impl CompressionCodec {
    pub(crate) fn tag(self) -> u8 {
        match self {
            CompressionCodec::Uncompressed => 0,
            CompressionCodec::Zstd => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionCodec::Uncompressed),
            1 => Some(CompressionCodec::Zstd),
            _ => None,
        }
    }
}

/// How the file manager decides that a local data file is already uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    /// Same file name and same size.
    #[default]
    NameAndSize,
    /// Same file name, size and CRC32 of the contents.
    ContentChecksum,
}

/// Configuration for a [`VersionedStore`](crate::VersionedStore).
///
/// # Example
///
/// ```rust
/// use versioned_state_store::StoreConfig;
///
/// let config = StoreConfig {
///     changelog_checkpointing: true,
///     min_deltas_for_snapshot: 5,
///     ..StoreConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Commit changelogs instead of uploading a snapshot per version.
    ///
    /// Default: false.
    pub changelog_checkpointing: bool,

    /// Allow named column families and merges.
    ///
    /// Default: false.
    pub column_families: bool,

    /// Changelog deltas since the last snapshot that trigger a new snapshot.
    ///
    /// Default: 10. Must be ≥ 1.
    pub min_deltas_for_snapshot: u64,

    /// Accumulated changelog bytes that trigger a snapshot. 0 disables.
    pub snapshot_changelog_bytes: u64,

    /// Accumulated changelog records that trigger a snapshot. 0 disables.
    pub snapshot_changelog_records: u64,

    /// Number of most recent versions kept loadable by maintenance.
    ///
    /// Default: 100. Must be ≥ 1.
    pub min_versions_to_retain: u64,

    /// Run a full compaction as part of each commit.
    pub compact_on_commit: bool,

    /// Data block compression.
    pub compression: CompressionCodec,

    /// How long `load` waits for the lease.
    ///
    /// Default: 60 000 ms.
    pub lock_acquire_timeout_ms: u64,

    /// Maintain an exact key count across commits.
    ///
    /// Default: true.
    pub track_total_number_of_rows: bool,

    /// Zero engine counters on every load.
    ///
    /// Default: true.
    pub reset_stats_on_load: bool,

    /// Share one memory budget across all bounded instances.
    pub bounded_memory_usage: bool,

    /// Size of the shared budget in MiB. Must be > 0.
    pub total_memory_usage_mb: u64,

    /// Share of the budget given to memtables. In `[0, 1)`.
    pub write_buffer_cache_ratio: f64,

    /// Share of the cache reserved for index and filter blocks. In `[0, 1)`.
    pub high_priority_pool_ratio: f64,

    /// Private block cache size in MiB for unbounded instances.
    pub block_cache_size_mb: u64,

    /// Maximum data files kept mapped at once; −1 for no limit.
    pub max_open_files: i32,

    /// Memtables held in memory (active plus frozen) before a forced flush.
    ///
    /// Default: 2. Must be ≥ 1.
    pub max_write_buffer_number: usize,

    /// Memtable size in MiB. `None` uses the engine default (64 MiB).
    pub write_buffer_size_mb: Option<u64>,

    /// Reserve data file space before writing.
    ///
    /// Default: true.
    pub allow_fallocate: bool,

    /// Remote deduplication policy.
    pub dedup_policy: DedupPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            changelog_checkpointing: false,
            column_families: false,
            min_deltas_for_snapshot: 10,
            snapshot_changelog_bytes: 0,
            snapshot_changelog_records: 0,
            min_versions_to_retain: 100,
            compact_on_commit: false,
            compression: CompressionCodec::Uncompressed,
            lock_acquire_timeout_ms: 60_000,
            track_total_number_of_rows: true,
            reset_stats_on_load: true,
            bounded_memory_usage: false,
            total_memory_usage_mb: 500,
            write_buffer_cache_ratio: 0.5,
            high_priority_pool_ratio: 0.1,
            block_cache_size_mb: 8,
            max_open_files: -1,
            max_write_buffer_number: 2,
            write_buffer_size_mb: None,
            allow_fallocate: true,
            dedup_policy: DedupPolicy::NameAndSize,
        }
    }
}

fn parse<T: std::str::FromStr>(option: &str, value: &str) -> Result<T, StoreError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| StoreError::invalid_config(option, value, "cannot be parsed"))
}

fn parse_bool(option: &str, value: &str) -> Result<bool, StoreError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(StoreError::invalid_config(option, value, "expected true or false")),
    }
}

impl StoreConfig {
    /// Checks every range constraint.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.min_deltas_for_snapshot < 1 {
            return Err(StoreError::invalid_config(
                "minDeltasForSnapshot",
                self.min_deltas_for_snapshot,
                "must be >= 1",
            ));
        }
        if self.min_versions_to_retain < 1 {
            return Err(StoreError::invalid_config(
                "minVersionsToRetain",
                self.min_versions_to_retain,
                "must be >= 1",
            ));
        }
        if self.total_memory_usage_mb == 0 {
            return Err(StoreError::invalid_config(
                "totalMemoryUsageMB",
                self.total_memory_usage_mb,
                "must be > 0",
            ));
        }
        for (option, ratio) in [
            ("writeBufferCacheRatio", self.write_buffer_cache_ratio),
            ("highPriorityPoolRatio", self.high_priority_pool_ratio),
        ] {
            if !(0.0..1.0).contains(&ratio) {
                return Err(StoreError::invalid_config(option, ratio, "must be in [0, 1)"));
            }
        }
        if self.write_buffer_cache_ratio + self.high_priority_pool_ratio >= 1.0 {
            return Err(StoreError::invalid_config(
                "writeBufferCacheRatio",
                self.write_buffer_cache_ratio,
                format!(
                    "sum with highPriorityPoolRatio ({}) must be < 1",
                    self.high_priority_pool_ratio
                ),
            ));
        }
        if self.max_open_files < -1 || self.max_open_files == 0 {
            return Err(StoreError::invalid_config(
                "maxOpenFiles",
                self.max_open_files,
                "must be -1 or a positive integer",
            ));
        }
        if self.max_write_buffer_number < 1 {
            return Err(StoreError::invalid_config(
                "maxWriteBufferNumber",
                self.max_write_buffer_number,
                "must be >= 1",
            ));
        }
        if self.write_buffer_size_mb == Some(0) {
            return Err(StoreError::invalid_config(
                "writeBufferSizeMB",
                0,
                "must be > 0",
            ));
        }
        for (option, mb) in [
            ("totalMemoryUsageMB", Some(self.total_memory_usage_mb)),
            ("blockCacheSizeMB", Some(self.block_cache_size_mb)),
            ("writeBufferSizeMB", self.write_buffer_size_mb),
        ] {
            if let Some(mb) = mb
                && mb_to_bytes(mb).is_none()
            {
                return Err(StoreError::invalid_config(
                    option,
                    mb,
                    "byte size does not fit in usize",
                ));
            }
        }
        Ok(())
    }

    /// Build a validated config from string options.
    ///
    /// ```rust
    /// use std::collections::HashMap;
    /// use versioned_state_store::StoreConfig;
    ///
    /// let options = HashMap::from([
    ///     ("stateStore.changelogCheckpointing.enabled".to_string(), "true".to_string()),
    ///     ("COMPRESSION".to_string(), "zstd".to_string()),
    /// ]);
    /// let config = StoreConfig::from_options(&options).unwrap();
    /// assert!(config.changelog_checkpointing);
    /// ```
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, StoreError> {
        let mut config = StoreConfig::default();

        for (raw_key, value) in options {
            let lowered = raw_key.to_ascii_lowercase();
            let key = lowered.strip_prefix(OPTION_PREFIX).unwrap_or(&lowered);

            match key {
                "changelogcheckpointing.enabled" => {
                    config.changelog_checkpointing = parse_bool(raw_key, value)?
                }
                "columnfamilies.enabled" => config.column_families = parse_bool(raw_key, value)?,
                "mindeltasforsnapshot" => config.min_deltas_for_snapshot = parse(raw_key, value)?,
                "snapshotchangelogbytes" => {
                    config.snapshot_changelog_bytes = parse(raw_key, value)?
                }
                "snapshotchangelogrecords" => {
                    config.snapshot_changelog_records = parse(raw_key, value)?
                }
                "minversionstoretain" => config.min_versions_to_retain = parse(raw_key, value)?,
                "compactoncommit" => config.compact_on_commit = parse_bool(raw_key, value)?,
                "compression" => {
                    config.compression = match value.trim().to_ascii_lowercase().as_str() {
                        "default" | "none" | "uncompressed" => CompressionCodec::Uncompressed,
                        "zstd" => CompressionCodec::Zstd,
                        _ => {
                            return Err(StoreError::invalid_config(
                                raw_key,
                                value,
                                "expected one of default, none, zstd",
                            ));
                        }
                    }
                }
                "lockacquiretimeoutms" => {
                    config.lock_acquire_timeout_ms = parse(raw_key, value)?
                }
                "tracktotalnumberofrows" => {
                    config.track_total_number_of_rows = parse_bool(raw_key, value)?
                }
                "resetstatsonload" => config.reset_stats_on_load = parse_bool(raw_key, value)?,
                "boundedmemoryusage" => config.bounded_memory_usage = parse_bool(raw_key, value)?,
                "totalmemoryusagemb" => config.total_memory_usage_mb = parse(raw_key, value)?,
                "writebuffercacheratio" => {
                    config.write_buffer_cache_ratio = parse(raw_key, value)?
                }
                "highprioritypoolratio" => {
                    config.high_priority_pool_ratio = parse(raw_key, value)?
                }
                "blockcachesizemb" => config.block_cache_size_mb = parse(raw_key, value)?,
                "maxopenfiles" => config.max_open_files = parse(raw_key, value)?,
                "maxwritebuffernumber" => {
                    config.max_write_buffer_number = parse(raw_key, value)?
                }
                "writebuffersizemb" => config.write_buffer_size_mb = Some(parse(raw_key, value)?),
                "allowfallocate" => config.allow_fallocate = parse_bool(raw_key, value)?,
                "deduppolicy" => {
                    config.dedup_policy = match value.trim().to_ascii_lowercase().as_str() {
                        "nameandsize" => DedupPolicy::NameAndSize,
                        "contentchecksum" => DedupPolicy::ContentChecksum,
                        _ => {
                            return Err(StoreError::invalid_config(
                                raw_key,
                                value,
                                "expected nameAndSize or contentChecksum",
                            ));
                        }
                    }
                }
                _ => debug!(option = %raw_key, "ignoring unknown state store option"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    // The accessors below saturate; `validate` rejects sizes that would.

    pub(crate) fn write_buffer_size_bytes(&self) -> Option<usize> {
        self.write_buffer_size_mb
            .map(|mb| mb_to_bytes(mb).unwrap_or(usize::MAX))
    }

    pub(crate) fn total_memory_bytes(&self) -> usize {
        mb_to_bytes(self.total_memory_usage_mb).unwrap_or(usize::MAX)
    }

    pub(crate) fn block_cache_bytes(&self) -> usize {
        mb_to_bytes(self.block_cache_size_mb).unwrap_or(usize::MAX)
    }
}

fn mb_to_bytes(mb: u64) -> Option<usize> {
    usize::try_from(mb).ok()?.checked_mul(MB)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_validate() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_deltas_for_snapshot, 10);
        assert_eq!(config.lock_acquire_timeout_ms, 60_000);
        assert!(config.allow_fallocate);
        assert_eq!(config.max_open_files, -1);
    }

    #[test]
    fn keys_are_case_insensitive_and_prefix_optional() {
        let config = StoreConfig::from_options(&options(&[
            ("stateStore.changelogCheckpointing.enabled", "TRUE"),
            ("COLUMNFAMILIES.ENABLED", "true"),
            ("minDeltasForSnapshot", "5"),
            ("statestore.compression", "ZSTD"),
            ("maxOpenFiles", "-1"),
            ("writeBufferSizeMB", "16"),
            ("dedupPolicy", "contentChecksum"),
            ("somethingElse", "whatever"),
        ]))
        .unwrap();

        assert!(config.changelog_checkpointing);
        assert!(config.column_families);
        assert_eq!(config.min_deltas_for_snapshot, 5);
        assert_eq!(config.compression, CompressionCodec::Zstd);
        assert_eq!(config.write_buffer_size_bytes(), Some(16 * MB));
        assert_eq!(config.dedup_policy, DedupPolicy::ContentChecksum);
    }

    #[test]
    fn default_compression_is_uncompressed() {
        for name in ["default", "none"] {
            let config = StoreConfig::from_options(&options(&[("compression", name)])).unwrap();
            assert_eq!(config.compression, CompressionCodec::Uncompressed);
        }
    }

    /// # Scenario
    /// Option values that fail to parse or violate a range.
    ///
    /// # Expected behavior
    /// Each is rejected with `InvalidConfiguration` naming the option.
    #[test]
    fn invalid_values_are_rejected() {
        let cases: &[(&str, &str)] = &[
            ("totalMemoryUsageMB", "0"),
            ("writeBufferCacheRatio", "1.0"),
            ("highPriorityPoolRatio", "-0.1"),
            ("maxOpenFiles", "abc"),
            ("maxOpenFiles", "0"),
            ("compression", "lz77"),
            ("boundedMemoryUsage", "yes"),
            ("minDeltasForSnapshot", "0"),
        ];
        for (key, value) in cases {
            let err = StoreConfig::from_options(&options(&[(key, value)])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfiguration, "{key}={value}");
        }
    }

    #[test]
    fn ratio_sum_must_stay_below_one() {
        let err = StoreConfig::from_options(&options(&[
            ("writeBufferCacheRatio", "0.6"),
            ("highPriorityPoolRatio", "0.4"),
        ]))
        .unwrap_err();
        let params = err.parameters();
        assert!(params.contains(&("option", "writeBufferCacheRatio".to_string())));
    }

    /// # Scenario
    /// Megabyte sizes whose byte count overflows `usize`.
    ///
    /// # Expected behavior
    /// `from_options` and `validate` reject them with `InvalidConfiguration`
    /// naming the option instead of overflowing later.
    #[test]
    fn oversized_megabyte_values_are_rejected() {
        let max = u64::MAX.to_string();
        for key in ["totalMemoryUsageMB", "blockCacheSizeMB", "writeBufferSizeMB"] {
            let err = StoreConfig::from_options(&options(&[(key, max.as_str())])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfiguration, "{key}");
            assert!(err.parameters().contains(&("option", key.to_string())));
        }

        let config = StoreConfig {
            total_memory_usage_mb: u64::MAX,
            ..StoreConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err().kind(),
            ErrorKind::InvalidConfiguration
        );
        assert_eq!(config.total_memory_bytes(), usize::MAX);
    }
}

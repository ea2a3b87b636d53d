use serde::Deserialize;

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Smallest part S3 accepts for every part but the last.
pub const PART_MIN: u64 = 5 * MIB;
/// Largest single part, and largest object a plain copy or put accepts.
pub const PART_MAX: u64 = 5 * GIB;
/// Max keys per multi-object delete request.
pub const MAX_DELETE_BATCH: usize = 1000;

pub const DEFAULT_BLOCK_SIZE: u64 = 5 * MIB;
pub const DEFAULT_RETRIES: usize = 5;
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_COPY_BLOCK_SIZE: u64 = 5 * GIB;
pub const DEFAULT_PIPE_CHUNK_SIZE: u64 = 50 * MIB;
pub const DEFAULT_METADATA_CACHE_CAPACITY: u64 = 10_000;

/// Read cache strategy of an [`ObjectReader`](super::io::reader::ObjectReader).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Every read fetches exactly the requested range.
    None,
    /// Keep one block-size window ahead of the last read.
    ReadAhead,
    /// One contiguous cached range that grows with sequential reads.
    #[default]
    Bytes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Write buffer threshold and read-ahead window.
    pub block_size: u64,
    /// Track object versions: `?versionId=` paths, head-based stat.
    pub version_aware: bool,
    /// Unsigned access; bucket listing is skipped.
    pub anonymous: bool,
    /// Attempts per remote call for transient failures.
    pub retries: usize,
    /// Parallel part uploads per flush.
    pub max_concurrency: usize,
    pub fill_cache: bool,
    pub cache_type: CacheType,
    /// Part size of managed copies of objects above 5 GiB.
    pub copy_block_size: u64,
    pub pipe_chunk_size: u64,
    /// Canned ACL applied to new objects.
    pub default_acl: Option<String>,
    /// Location constraint for new buckets.
    pub region: Option<String>,
    pub metadata_cache_capacity: u64,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            version_aware: false,
            anonymous: false,
            retries: DEFAULT_RETRIES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            fill_cache: true,
            cache_type: CacheType::default(),
            copy_block_size: DEFAULT_COPY_BLOCK_SIZE,
            pipe_chunk_size: DEFAULT_PIPE_CHUNK_SIZE,
            default_acl: None,
            region: None,
            metadata_cache_capacity: DEFAULT_METADATA_CACHE_CAPACITY,
        }
    }
}

impl FsConfig {
    pub fn block_size(self, block_size: u64) -> Self {
        Self { block_size, ..self }
    }

    pub fn version_aware(self, version_aware: bool) -> Self {
        Self {
            version_aware,
            ..self
        }
    }

    pub fn anonymous(self, anonymous: bool) -> Self {
        Self { anonymous, ..self }
    }

    pub fn retries(self, retries: usize) -> Self {
        Self { retries, ..self }
    }

    pub fn max_concurrency(self, max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..self
        }
    }

    pub fn fill_cache(self, fill_cache: bool) -> Self {
        Self { fill_cache, ..self }
    }

    pub fn cache_type(self, cache_type: CacheType) -> Self {
        Self { cache_type, ..self }
    }

    pub fn copy_block_size(self, copy_block_size: u64) -> Self {
        Self {
            copy_block_size,
            ..self
        }
    }

    pub fn pipe_chunk_size(self, pipe_chunk_size: u64) -> Self {
        Self {
            pipe_chunk_size,
            ..self
        }
    }

    pub fn default_acl(self, default_acl: Option<String>) -> Self {
        Self {
            default_acl,
            ..self
        }
    }

    pub fn region(self, region: Option<String>) -> Self {
        Self { region, ..self }
    }
}

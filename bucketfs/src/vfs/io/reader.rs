//! Ranged object reader with a pluggable block cache.

use crate::cadapter::client::{ByteRange, GetObjectRequest, ObjectBackend, RemoteOp};
use crate::vfs::config::CacheType;
use crate::vfs::entry::Entry;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::fs::ObjectFs;
use crate::vfs::path;
use bytes::{Bytes, BytesMut};
use std::io::SeekFrom;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub block_size: Option<u64>,
    pub cache_type: Option<CacheType>,
    pub fill_cache: Option<bool>,
    pub version_id: Option<String>,
}

impl ReadOptions {
    pub fn block_size(self, block_size: u64) -> Self {
        Self {
            block_size: Some(block_size),
            ..self
        }
    }

    pub fn cache_type(self, cache_type: CacheType) -> Self {
        Self {
            cache_type: Some(cache_type),
            ..self
        }
    }

    pub fn fill_cache(self, fill_cache: bool) -> Self {
        Self {
            fill_cache: Some(fill_cache),
            ..self
        }
    }

    pub fn version_id(self, version_id: impl Into<String>) -> Self {
        Self {
            version_id: Some(version_id.into()),
            ..self
        }
    }
}

/// Contiguous window `[start, start + data.len())` of the object.
#[derive(Default)]
struct Window {
    start: u64,
    data: Bytes,
}

impl Window {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn covers(&self, start: u64, end: u64) -> bool {
        !self.is_empty() && start >= self.start && end <= self.end()
    }

    fn slice(&self, start: u64, end: u64) -> Bytes {
        let from = (start - self.start) as usize;
        let to = (end - self.start) as usize;
        self.data.slice(from..to)
    }
}

fn concat(a: &[u8], b: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out.freeze()
}

pub struct ObjectReader<B: ObjectBackend> {
    fs: ObjectFs<B>,
    path: String,
    bucket: String,
    key: String,
    version_id: Option<String>,
    details: Entry,
    size: u64,
    block_size: u64,
    cache_type: CacheType,
    fill_cache: bool,
    window: Window,
    loc: u64,
}

impl<B: ObjectBackend> ObjectFs<B> {
    /// Opens an object for reading. The etag seen here guards every later
    /// ranged read.
    pub async fn open_read(&self, path: &str, opts: ReadOptions) -> VfsResult<ObjectReader<B>> {
        let p = self.resolve(path);
        if p.key.is_empty() {
            return Err(VfsError::invalid(format!(
                "attempt to open non key-like path: {path}"
            )));
        }
        let version = path::coalesce_version(
            p.version_id.as_deref(),
            opts.version_id.as_deref(),
            self.config().version_aware,
        )?;
        let name = p.full();

        let mut version_id = version.clone();
        let details = match version.as_deref() {
            Some(v) => self.info_with(&name, false, Some(v)).await?,
            None if self.config().version_aware => {
                self.invalidate_cache(Some(&name));
                let details = self.info_with(&name, true, None).await?;
                version_id = details.version_id.clone();
                details
            }
            None => self.info(&name).await?,
        };
        if details.is_dir() {
            return Err(VfsError::IsADirectory { path: name });
        }
        debug!(path = %name, size = details.size, version = ?version_id, "open for read");
        Ok(ObjectReader {
            fs: self.clone(),
            bucket: p.bucket,
            key: p.key,
            path: name,
            version_id,
            size: details.size,
            details,
            block_size: opts.block_size.unwrap_or(self.config().block_size),
            cache_type: opts.cache_type.unwrap_or(self.config().cache_type),
            fill_cache: opts.fill_cache.unwrap_or(self.config().fill_cache),
            window: Window::default(),
            loc: 0,
        })
    }
}

impl<B: ObjectBackend> ObjectReader<B> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn details(&self) -> &Entry {
        &self.details
    }

    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }

    pub fn tell(&self) -> u64 {
        self.loc
    }

    pub fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(d) => self.loc as i128 + d as i128,
            SeekFrom::End(d) => self.size as i128 + d as i128,
        };
        if target < 0 {
            return Err(VfsError::invalid("seek to a negative position"));
        }
        self.loc = target as u64;
        Ok(self.loc)
    }

    /// Reads up to `n` bytes from the current position; `None` reads to EOF.
    pub async fn read(&mut self, n: Option<usize>) -> VfsResult<Bytes> {
        let end = match n {
            Some(n) => self.loc.saturating_add(n as u64),
            None => self.size,
        };
        let out = self.fetch(self.loc, end).await?;
        self.loc += out.len() as u64;
        Ok(out)
    }

    pub async fn read_to_end(&mut self) -> VfsResult<Bytes> {
        self.read(None).await
    }

    /// One uncached ranged get of `[start, end)`, clamped to the object size.
    pub async fn read_range(&self, start: u64, end: u64) -> VfsResult<Bytes> {
        let end = end.min(self.size);
        if start >= end {
            return Ok(Bytes::new());
        }
        let req = GetObjectRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            version_id: self.version_id.clone(),
            range: Some(ByteRange::new(start, end)),
            if_match: self.details.etag.clone(),
        };
        let fs = &self.fs;
        let out = fs
            .call(RemoteOp::GetObject, &self.path, || fs.backend().get_object(&req))
            .await;
        match out {
            Ok(out) => Ok(out.body),
            Err(VfsError::PreconditionFailed { .. }) => Err(VfsError::ContentExpired {
                path: self.path.clone(),
                etag: self.details.etag.clone().unwrap_or_default(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn fetch(&mut self, start: u64, end: u64) -> VfsResult<Bytes> {
        let end = end.min(self.size);
        if start >= end {
            return Ok(Bytes::new());
        }
        match self.cache_type {
            CacheType::None => self.read_range(start, end).await,
            CacheType::ReadAhead => self.read_ahead(start, end).await,
            CacheType::Bytes => self.read_cached(start, end).await,
        }
    }

    /// Keeps one block past the last read; a read overlapping the window
    /// reuses the cached head and refills from the window end.
    async fn read_ahead(&mut self, start: u64, end: u64) -> VfsResult<Bytes> {
        if self.window.covers(start, end) {
            return Ok(self.window.slice(start, end));
        }
        let (head, from) = if !self.window.is_empty()
            && start >= self.window.start
            && start < self.window.end()
        {
            (self.window.slice(start, self.window.end()), self.window.end())
        } else {
            (Bytes::new(), start)
        };
        let bend = (end + self.block_size).min(self.size);
        let data = self.read_range(from, bend).await?;
        self.window = Window { start: from, data };
        let tail = self.window.slice(from, end.min(self.window.end()));
        Ok(concat(&head, &tail))
    }

    /// Contiguous cache: reads adjacent to the window grow it, distant reads
    /// replace it. With `fill_cache`, forward gaps are fetched to keep the
    /// window contiguous.
    async fn read_cached(&mut self, start: u64, end: u64) -> VfsResult<Bytes> {
        if self.window.covers(start, end) {
            return Ok(self.window.slice(start, end));
        }
        let bend = (end + self.block_size).min(self.size);
        let (wstart, wend) = (self.window.start, self.window.end());

        if self.window.is_empty() || (start < wstart && end > wend) {
            let data = self.read_range(start, bend).await?;
            self.window = Window { start, data };
        } else if start < wstart {
            if end >= wstart {
                let before = self.read_range(start, wstart).await?;
                self.window = Window {
                    start,
                    data: concat(&before, &self.window.data),
                };
            } else {
                let data = self.read_range(start, bend).await?;
                self.window = Window { start, data };
            }
        } else if start <= wend || self.fill_cache {
            let after = self.read_range(wend, bend).await?;
            self.window.data = concat(&self.window.data, &after);
        } else {
            let data = self.read_range(start, bend).await?;
            self.window = Window { start, data };
        }
        let end = end.min(self.window.end());
        Ok(self.window.slice(start, end))
    }
}

impl<B: ObjectBackend> std::fmt::Debug for ObjectReader<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("loc", &self.loc)
            .field("cache_type", &self.cache_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::MemoryBackend;
    use crate::vfs::config::{FsConfig, MIB};

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn fs_with(key: &str, body: Vec<u8>, config: FsConfig) -> ObjectFs<MemoryBackend> {
        let backend = MemoryBackend::new();
        backend.insert_object("bkt", key, body);
        ObjectFs::new(backend, config)
    }

    #[tokio::test]
    async fn test_sequential_reads_and_seek() {
        let body = data(1000);
        let fs = fs_with("f", body.clone(), FsConfig::default());
        let mut r = fs.open_read("bkt/f", ReadOptions::default()).await.unwrap();
        assert_eq!(r.size(), 1000);
        assert_eq!(&r.read(Some(10)).await.unwrap()[..], &body[..10]);
        assert_eq!(r.tell(), 10);
        assert_eq!(r.seek(SeekFrom::End(-5)).unwrap(), 995);
        assert_eq!(&r.read(Some(100)).await.unwrap()[..], &body[995..]);
        assert!(r.read(Some(1)).await.unwrap().is_empty());
        assert!(r.seek(SeekFrom::Current(-2000)).is_err());
        r.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(&r.read_to_end().await.unwrap()[..], &body[..]);
    }

    #[tokio::test]
    async fn test_empty_range_skips_remote_call() {
        let fs = fs_with("f", data(100), FsConfig::default());
        let r = fs.open_read("bkt/f", ReadOptions::default()).await.unwrap();
        fs.backend().reset_calls();
        assert!(r.read_range(7, 7).await.unwrap().is_empty());
        assert!(r.read_range(200, 300).await.unwrap().is_empty());
        assert_eq!(fs.backend().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_bytes_cache_serves_small_reads_once() {
        let body = data(4096);
        let fs = fs_with("f", body.clone(), FsConfig::default());
        let mut r = fs.open_read("bkt/f", ReadOptions::default()).await.unwrap();
        for _ in 0..8 {
            r.read(Some(512)).await.unwrap();
        }
        assert_eq!(fs.backend().count(RemoteOp::GetObject), 1);
    }

    #[tokio::test]
    async fn test_no_cache_fetches_exact_ranges() {
        let body = data(4096);
        let fs = fs_with("f", body.clone(), FsConfig::default());
        let opts = ReadOptions::default().cache_type(CacheType::None);
        let mut r = fs.open_read("bkt/f", opts).await.unwrap();
        let a = r.read(Some(100)).await.unwrap();
        let b = r.read(Some(100)).await.unwrap();
        assert_eq!(&a[..], &body[..100]);
        assert_eq!(&b[..], &body[100..200]);
        assert_eq!(fs.backend().count(RemoteOp::GetObject), 2);
    }

    #[tokio::test]
    async fn test_read_ahead_and_bytes_cache_across_blocks() {
        let block = 5 * MIB;
        let body = data((3 * block) as usize);
        for cache_type in [CacheType::ReadAhead, CacheType::Bytes] {
            let fs = fs_with("f", body.clone(), FsConfig::default());
            let opts = ReadOptions::default().cache_type(cache_type);
            let mut r = fs.open_read("bkt/f", opts).await.unwrap();
            let mut out = Vec::new();
            loop {
                let chunk = r.read(Some(MIB as usize + 17)).await.unwrap();
                if chunk.is_empty() {
                    break;
                }
                out.extend_from_slice(&chunk);
            }
            assert_eq!(out, body, "{cache_type:?}");
            assert!(fs.backend().count(RemoteOp::GetObject) < 8);
        }
    }

    #[tokio::test]
    async fn test_backwards_read_in_bytes_cache() {
        let body = data(20_000);
        let fs = fs_with("f", body.clone(), FsConfig::default().block_size(5 * MIB));
        let opts = ReadOptions::default().block_size(5 * MIB);
        let mut r = fs.open_read("bkt/f", opts).await.unwrap();
        r.seek(SeekFrom::Start(10_000)).unwrap();
        assert_eq!(&r.read(Some(100)).await.unwrap()[..], &body[10_000..10_100]);
        r.seek(SeekFrom::Start(9_000)).unwrap();
        assert_eq!(&r.read(Some(2_000)).await.unwrap()[..], &body[9_000..11_000]);
        r.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(&r.read(Some(50)).await.unwrap()[..], &body[..50]);
    }

    #[tokio::test]
    async fn test_concurrent_change_is_content_expired() {
        let fs = fs_with("f", data(100), FsConfig::default());
        let opts = ReadOptions::default().cache_type(CacheType::None);
        let mut r = fs.open_read("bkt/f", opts).await.unwrap();
        fs.backend().insert_object("bkt", "f", b"replaced".to_vec());
        let err = r.read(Some(10)).await.unwrap_err();
        assert!(matches!(err, VfsError::ContentExpired { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_open_rejects_directories_and_buckets() {
        let fs = fs_with("dir/f", data(10), FsConfig::default());
        assert!(matches!(
            fs.open_read("bkt/dir", ReadOptions::default()).await.unwrap_err(),
            VfsError::IsADirectory { .. }
        ));
        assert!(matches!(
            fs.open_read("bkt", ReadOptions::default()).await.unwrap_err(),
            VfsError::InvalidArgument(_)
        ));
        assert!(fs
            .open_read("bkt/missing", ReadOptions::default())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_version_aware_read_is_pinned() {
        let backend = MemoryBackend::new();
        backend.create_bucket_now("bkt");
        backend.set_versioning("bkt", true);
        backend.insert_object("bkt", "f", b"first".to_vec());
        let fs = ObjectFs::new(backend, FsConfig::default().version_aware(true));

        let mut r = fs.open_read("bkt/f", ReadOptions::default()).await.unwrap();
        let pinned = r.version_id().map(str::to_string);
        assert!(pinned.is_some());
        fs.backend().insert_object("bkt", "f", b"second!".to_vec());
        assert_eq!(&r.read_to_end().await.unwrap()[..], b"first");

        let opts = ReadOptions::default().version_id(pinned.unwrap());
        let mut old = fs.open_read("bkt/f", opts).await.unwrap();
        assert_eq!(&old.read_to_end().await.unwrap()[..], b"first");
        let mut latest = fs.open_read("bkt/f", ReadOptions::default()).await.unwrap();
        assert_eq!(&latest.read_to_end().await.unwrap()[..], b"second!");
    }
}

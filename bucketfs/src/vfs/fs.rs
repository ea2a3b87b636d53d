//! Object filesystem core: shared state and stat-like queries.
//!
//! `ObjectFs` is cheap to clone; clones share the backend, the directory
//! cache and the metadata cache. Listing, transfer and mutation operations
//! live in sibling modules as further `impl` blocks.

use super::cache::{CacheLookup, DirCache};
use super::config::FsConfig;
use super::entry::Entry;
use super::error::{VfsError, VfsResult};
use super::gateway::{Gateway, RetryPolicy};
use super::path::{self, ObjectPath};
use crate::cadapter::client::{
    BackendResult, HeadObjectOutput, ListObjectsPage, ListObjectsRequest, ObjectBackend,
    RemoteOp, WriteOptions,
};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub struct ObjectFs<B: ObjectBackend> {
    backend: Arc<B>,
    config: Arc<FsConfig>,
    gateway: Gateway,
    dircache: Arc<DirCache>,
    pub(crate) meta_cache: Cache<String, HashMap<String, String>>,
}

impl<B: ObjectBackend> Clone for ObjectFs<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            config: self.config.clone(),
            gateway: self.gateway.clone(),
            dircache: self.dircache.clone(),
            meta_cache: self.meta_cache.clone(),
        }
    }
}

impl<B: ObjectBackend> ObjectFs<B> {
    pub fn new(backend: B, config: FsConfig) -> Self {
        Self::from_arc(Arc::new(backend), config)
    }

    pub fn from_arc(backend: Arc<B>, config: FsConfig) -> Self {
        let gateway = Gateway::new(RetryPolicy::new(config.retries));
        let meta_cache = Cache::builder()
            .max_capacity(config.metadata_cache_capacity)
            .build();
        Self {
            backend,
            config: Arc::new(config),
            gateway,
            dircache: Arc::new(DirCache::new()),
            meta_cache,
        }
    }

    /// Replaces the retry policy, e.g. to shorten backoff in tests.
    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        Self {
            gateway: Gateway::new(policy),
            ..self
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn dircache(&self) -> &Arc<DirCache> {
        &self.dircache
    }

    pub fn resolve(&self, path: &str) -> ObjectPath {
        path::resolve(path, self.config.version_aware)
    }

    pub(crate) async fn call<T, F, Fut>(&self, op: RemoteOp, target: &str, f: F) -> VfsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        self.gateway.call(op, target, f).await
    }

    pub(crate) fn write_options(&self, acl: Option<&str>) -> WriteOptions {
        WriteOptions {
            acl: acl
                .map(str::to_string)
                .or_else(|| self.config.default_acl.clone()),
            ..Default::default()
        }
    }

    pub(crate) async fn head(
        &self,
        p: &ObjectPath,
        version_id: Option<&str>,
        part_number: Option<i32>,
    ) -> VfsResult<HeadObjectOutput> {
        let target = p.full();
        self.call(RemoteOp::HeadObject, &target, || {
            self.backend
                .head_object(&p.bucket, &p.key, version_id, part_number)
        })
        .await
    }

    pub(crate) async fn list_page(&self, req: &ListObjectsRequest) -> VfsResult<ListObjectsPage> {
        let target = path::join(&req.bucket, &req.prefix);
        self.call(RemoteOp::ListObjectsV2, &target, || {
            self.backend.list_objects_v2(req)
        })
        .await
    }

    /// Stat `path` using the cache when possible.
    pub async fn info(&self, path: &str) -> VfsResult<Entry> {
        self.info_with(path, false, None).await
    }

    /// Stat `path`: cache first (unless `refresh`), then a file probe, then a
    /// directory probe.
    pub async fn info_with(
        &self,
        path: &str,
        refresh: bool,
        version_id: Option<&str>,
    ) -> VfsResult<Entry> {
        if version_id.is_some() && !self.config.version_aware {
            return Err(VfsError::invalid(
                "version_id cannot be given on a filesystem that is not version aware",
            ));
        }
        let p = self.resolve(path);
        if p.is_root() {
            return Ok(Entry::directory(""));
        }
        let name = p.full();
        let version = path::coalesce_version(
            p.version_id.as_deref(),
            version_id,
            self.config.version_aware,
        )?;

        if !refresh && version.is_none() {
            match self.dircache.ls_from_cache(&name) {
                CacheLookup::Listing(entries) => {
                    return Ok(entries
                        .into_iter()
                        .find(|e| e.name == name)
                        .unwrap_or_else(|| Entry::directory(&name)));
                }
                // The bucket list only covers owned buckets.
                CacheLookup::Absent if !p.key.is_empty() => {
                    return Err(VfsError::not_found(path));
                }
                _ => {}
            }
        }

        if !p.key.is_empty() {
            let found = if self.config.version_aware {
                self.head_info(&p, version.as_deref()).await?
            } else {
                match self.simple_info(&p, path).await {
                    Err(e) if e.is_permission_denied() => {
                        debug!(path, "listing denied, falling back to head_object");
                        self.head_info(&p, None).await?
                    }
                    other => other?,
                }
            };
            if let Some(entry) = found {
                return Ok(entry);
            }
        }

        let prefix = if p.key.is_empty() {
            String::new()
        } else {
            format!("{}/", p.key.trim_end_matches('/'))
        };
        let req = ListObjectsRequest::new(&p.bucket, prefix)
            .delimiter("/")
            .max_keys(1);
        let page = self.list_page(&req).await?;
        if page.is_empty() {
            return Err(VfsError::not_found(path));
        }
        Ok(Entry::directory(name))
    }

    /// File probe through a one-key listing. `Ok(None)` means the prefix has
    /// content but no object with exactly this key.
    async fn simple_info(&self, p: &ObjectPath, path: &str) -> VfsResult<Option<Entry>> {
        let req = ListObjectsRequest::new(&p.bucket, &p.key)
            .delimiter("/")
            .max_keys(1);
        let page = self.list_page(&req).await?;
        if let Some(obj) = page.objects.first() {
            if obj.key == p.key {
                return Ok(Some(Entry::from_summary(&p.bucket, obj)));
            }
        }
        if page.is_empty() {
            return Err(VfsError::not_found(path));
        }
        Ok(None)
    }

    async fn head_info(&self, p: &ObjectPath, version_id: Option<&str>) -> VfsResult<Option<Entry>> {
        match self.head(p, version_id, None).await {
            Ok(head) => Ok(Some(Entry::from_head(p.full(), &head))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, path: &str) -> VfsResult<bool> {
        let p = self.resolve(path);
        if p.is_root() {
            return Ok(true);
        }
        if !p.key.is_empty() {
            match self.dircache.ls_from_cache(path) {
                CacheLookup::Listing(_) => return Ok(true),
                CacheLookup::Absent => return Ok(false),
                CacheLookup::Miss => {}
            }
            return match self.info_with(path, false, None).await {
                Ok(_) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            };
        }
        if self.dircache.get(&p.bucket).is_some_and(|l| !l.is_empty()) {
            return Ok(true);
        }
        if let CacheLookup::Listing(_) = self.dircache.ls_from_cache(&p.bucket) {
            return Ok(true);
        }
        // Might still be a bucket we can read but do not own.
        let req = ListObjectsRequest::new(&p.bucket, "").max_keys(1);
        Ok(self.list_page(&req).await.is_ok())
    }

    pub async fn isdir(&self, path: &str) -> VfsResult<bool> {
        let path = path::normalize(path);
        if path.is_empty() {
            return Ok(true);
        }
        if !path.contains('/') {
            if self.lsbuckets(false).await?.iter().any(|b| b.name == path) {
                return Ok(true);
            }
            return match self.lsdir(&path, false, "/", "").await {
                Ok(_) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            };
        }
        if let Some(listing) = self.dircache.get(&path) {
            // A file's own listing may contain just itself.
            return Ok(listing.iter().any(|e| e.name != path));
        }
        let parent = path::parent(&path);
        if let Some(siblings) = self.dircache.get(&parent) {
            return Ok(siblings.iter().any(|e| e.name == path && e.is_dir()));
        }
        Ok(!self.lsdir(&path, false, "/", "").await?.is_empty())
    }

    pub async fn isfile(&self, path: &str) -> VfsResult<bool> {
        if self.resolve(path).key.is_empty() {
            return Ok(false);
        }
        match self.info(path).await {
            Ok(entry) => Ok(entry.is_file()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn size(&self, path: &str) -> VfsResult<u64> {
        Ok(self.info(path).await?.size)
    }

    /// Value that stays equal as long as the content does: the etag digest for
    /// files, a digest of the entry for directories.
    pub async fn checksum(&self, path: &str, refresh: bool) -> VfsResult<u128> {
        let entry = self.info_with(path, refresh, None).await?;
        if entry.is_dir() {
            let digest = md5::compute(format!("{entry:?}"));
            return Ok(u128::from_be_bytes(digest.0));
        }
        let etag = entry.bare_etag().unwrap_or_default();
        let hex = etag.split('-').next().unwrap_or_default();
        u128::from_str_radix(hex, 16)
            .map_err(|_| VfsError::invalid(format!("etag of {path} is not hexadecimal: {etag}")))
    }

    pub async fn modified(
        &self,
        path: &str,
        version_id: Option<&str>,
        refresh: bool,
    ) -> VfsResult<DateTime<Utc>> {
        let entry = self.info_with(path, refresh, version_id).await?;
        entry.last_modified.ok_or_else(|| VfsError::IsADirectory {
            path: path.to_string(),
        })
    }

    /// Drops cached listings for `path` and its ancestors, or everything.
    pub fn invalidate_cache(&self, path: Option<&str>) {
        self.dircache.invalidate(path);
    }

    /// Drops the per-bucket clients the backend keeps.
    pub async fn invalidate_region_cache(&self) {
        self.backend.clear_region_cache().await;
    }

    /// Cache invalidation after a new object appeared at `path`: its parent,
    /// plus every cached ancestor whose listing does not show the next path
    /// component yet.
    pub(crate) fn invalidate_for_new_object(&self, path: &str) {
        let path = path::normalize(path);
        let mut current = String::new();
        for part in path.split('/') {
            let child = if current.is_empty() {
                part.to_string()
            } else {
                format!("{current}/{part}")
            };
            if !current.is_empty() && self.dircache.lists(&current, &child) == Some(false) {
                self.dircache.invalidate(Some(&current));
            }
            current = child;
        }
        self.dircache.invalidate(Some(&path::parent(&path)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::{Fault, MemoryBackend};
    use crate::vfs::entry::EntryKind;

    fn fs_with(objects: &[(&str, &[u8])]) -> ObjectFs<MemoryBackend> {
        let backend = MemoryBackend::new();
        backend.create_bucket_now("bkt");
        for (key, data) in objects {
            backend.insert_object("bkt", key, data.to_vec());
        }
        ObjectFs::new(backend, FsConfig::default())
    }

    #[tokio::test]
    async fn test_info_file_and_directory() {
        let fs = fs_with(&[("dir/a.txt", b"hello"), ("top", b"x")]);
        let file = fs.info("s3://bkt/dir/a.txt").await.unwrap();
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.size, 5);
        assert_eq!(file.name, "bkt/dir/a.txt");

        let dir = fs.info("bkt/dir").await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.size, 0);

        assert!(fs.info("bkt/nothing").await.unwrap_err().is_not_found());
        assert!(fs.info("").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_cached_parent_answers_without_remote_calls() {
        let fs = fs_with(&[("dir/a.txt", b"hello")]);
        fs.lsdir("bkt/dir", false, "/", "").await.unwrap();
        fs.backend().reset_calls();

        assert_eq!(fs.info("bkt/dir/a.txt").await.unwrap().size, 5);
        assert!(fs.info("bkt/dir/zzz").await.unwrap_err().is_not_found());
        assert_eq!(fs.backend().total_calls(), 0);

        // after invalidation the stat goes to the store again
        fs.invalidate_cache(Some("bkt/dir/a.txt"));
        fs.info("bkt/dir/a.txt").await.unwrap();
        assert!(fs.backend().total_calls() > 0);
    }

    #[tokio::test]
    async fn test_listing_denied_falls_back_to_head() {
        let fs = fs_with(&[("k", b"abc")]);
        fs.backend()
            .fail_next(RemoteOp::ListObjectsV2, Fault::service("AccessDenied", 403), 1);
        let entry = fs.info("bkt/k").await.unwrap();
        assert_eq!(entry.size, 3);
        assert_eq!(fs.backend().count(RemoteOp::HeadObject), 1);
    }

    #[tokio::test]
    async fn test_version_on_unaware_fs_rejected() {
        let fs = fs_with(&[("k", b"abc")]);
        let err = fs.info_with("bkt/k", false, Some("v1")).await.unwrap_err();
        assert!(matches!(err, VfsError::InvalidArgument(_)));
        assert_eq!(fs.backend().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_exists_isdir_isfile() {
        let fs = fs_with(&[("d/f", b"1")]);
        assert!(fs.exists("bkt").await.unwrap());
        assert!(fs.exists("bkt/d/f").await.unwrap());
        assert!(!fs.exists("bkt/d/g").await.unwrap());
        assert!(!fs.exists("nobucket").await.unwrap());

        assert!(fs.isdir("bkt").await.unwrap());
        assert!(fs.isdir("bkt/d").await.unwrap());
        assert!(!fs.isdir("bkt/d/f").await.unwrap());
        assert!(fs.isfile("bkt/d/f").await.unwrap());
        assert!(!fs.isfile("bkt/d").await.unwrap());
    }

    #[tokio::test]
    async fn test_checksum_and_modified() {
        let fs = fs_with(&[("d/f", b"hello")]);
        let sum = fs.checksum("bkt/d/f", false).await.unwrap();
        assert_eq!(sum, u128::from_str_radix("5d41402abc4b2a76b9719d911017c592", 16).unwrap());
        fs.checksum("bkt/d", false).await.unwrap();

        assert!(fs.modified("bkt/d/f", None, false).await.is_ok());
        assert!(matches!(
            fs.modified("bkt/d", None, false).await.unwrap_err(),
            VfsError::IsADirectory { .. }
        ));
    }
}

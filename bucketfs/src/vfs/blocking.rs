//! Synchronous facade over [`ObjectFs`] for callers without a runtime.

use crate::cadapter::client::ObjectBackend;
use crate::vfs::entry::Entry;
use crate::vfs::error::VfsResult;
use crate::vfs::fs::ObjectFs;
use crate::vfs::listing::FindOptions;
use bytes::Bytes;
use std::path::Path;
use tokio::runtime::{Builder, Runtime};

/// Owns a multi-threaded runtime and blocks on each call.
///
/// Must not be used from inside another tokio runtime.
pub struct BlockingFs<B: ObjectBackend> {
    fs: ObjectFs<B>,
    rt: Runtime,
}

impl<B: ObjectBackend> BlockingFs<B> {
    pub fn new(fs: ObjectFs<B>) -> VfsResult<Self> {
        let rt = Builder::new_multi_thread()
            .thread_name("bucketfs-io")
            .enable_all()
            .build()?;
        Ok(Self { fs, rt })
    }

    pub fn inner(&self) -> &ObjectFs<B> {
        &self.fs
    }

    pub fn ls(&self, path: &str, refresh: bool) -> VfsResult<Vec<Entry>> {
        self.rt.block_on(self.fs.ls(path, refresh))
    }

    pub fn info(&self, path: &str) -> VfsResult<Entry> {
        self.rt.block_on(self.fs.info(path))
    }

    pub fn exists(&self, path: &str) -> VfsResult<bool> {
        self.rt.block_on(self.fs.exists(path))
    }

    pub fn find(&self, path: &str, opts: FindOptions) -> VfsResult<Vec<String>> {
        self.rt.block_on(self.fs.find_names(path, opts))
    }

    pub fn cat_file(&self, path: &str, start: Option<u64>, end: Option<u64>) -> VfsResult<Bytes> {
        self.rt.block_on(self.fs.cat_file(path, start, end))
    }

    pub fn pipe_file(&self, path: &str, data: Bytes) -> VfsResult<()> {
        self.rt.block_on(self.fs.pipe_file(path, data, None))
    }

    pub fn put_file(&self, local: impl AsRef<Path>, remote: &str) -> VfsResult<()> {
        self.rt.block_on(self.fs.put_file(local, remote, None))
    }

    pub fn get_file(&self, remote: &str, local: impl AsRef<Path>) -> VfsResult<()> {
        self.rt.block_on(self.fs.get_file(remote, local))
    }

    pub fn touch(&self, path: &str, truncate: bool) -> VfsResult<()> {
        self.rt.block_on(self.fs.touch(path, truncate))
    }

    pub fn makedirs(&self, path: &str, exist_ok: bool) -> VfsResult<()> {
        self.rt.block_on(self.fs.makedirs(path, exist_ok))
    }

    pub fn copy(&self, src: &str, dst: &str, recursive: bool) -> VfsResult<()> {
        self.rt.block_on(self.fs.copy(src, dst, recursive))
    }

    pub fn mv(&self, src: &str, dst: &str, recursive: bool) -> VfsResult<()> {
        self.rt.block_on(self.fs.mv(src, dst, recursive))
    }

    pub fn rm(&self, path: &str, recursive: bool) -> VfsResult<()> {
        self.rt.block_on(self.fs.rm(&[path], recursive, None))
    }

    pub fn checksum(&self, path: &str) -> VfsResult<u128> {
        self.rt.block_on(self.fs.checksum(path, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::MemoryBackend;
    use crate::vfs::config::FsConfig;

    #[test]
    fn test_blocking_round_trip() {
        let backend = MemoryBackend::new();
        backend.create_bucket_now("bkt");
        let fs = BlockingFs::new(ObjectFs::new(backend, FsConfig::default())).unwrap();

        fs.pipe_file("bkt/dir/f", Bytes::from_static(b"sync")).unwrap();
        assert!(fs.exists("bkt/dir/f").unwrap());
        assert_eq!(&fs.cat_file("bkt/dir/f", None, None).unwrap()[..], b"sync");
        assert_eq!(fs.find("bkt", FindOptions::default()).unwrap(), vec!["bkt/dir/f"]);

        fs.mv("bkt/dir/f", "bkt/g", false).unwrap();
        assert!(!fs.exists("bkt/dir/f").unwrap());
        fs.rm("bkt/g", false).unwrap();
        assert!(fs.ls("bkt", true).unwrap().is_empty());
    }
}

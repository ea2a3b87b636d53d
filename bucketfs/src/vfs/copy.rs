//! Server-side copies.
//!
//! Three strategies, picked by [`ObjectFs::cp_file`]:
//! - basic: one `copy_object`, objects up to 5 GiB
//! - etag preserving: the source's multipart layout is replayed part by part,
//!   so the copy ends up with the same `<md5>-<n>` etag
//! - managed: `upload_part_copy` in `copy_block_size` blocks, above 5 GiB

use crate::cadapter::client::{
    ByteRange, CompletedPart, CopyObjectRequest, ObjectBackend, ObjectRef, RemoteOp,
    UploadPartCopyRequest,
};
use crate::vfs::config::{PART_MAX, PART_MIN};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::fs::ObjectFs;
use crate::vfs::listing::FindOptions;
use crate::vfs::path::{self, ObjectPath};
use futures::future::try_join_all;
use tracing::debug;

/// Largest object a single `copy_object` may copy.
pub const MANAGED_COPY_THRESHOLD: u64 = PART_MAX;

impl<B: ObjectBackend> ObjectFs<B> {
    pub async fn cp_file(&self, src: &str, dst: &str, preserve_etag: bool) -> VfsResult<()> {
        let s = self.resolve(src);
        let d = self.resolve(dst);
        if s.key.is_empty() || d.key.is_empty() {
            return Err(VfsError::invalid(format!(
                "copy needs object paths, got {src} -> {dst}"
            )));
        }
        if d.version_id.is_some() {
            return Err(VfsError::invalid("cannot copy to an explicit version"));
        }
        let info = self
            .info_with(&s.full(), false, s.version_id.as_deref())
            .await?;
        if info.is_dir() {
            return Err(VfsError::IsADirectory { path: s.full() });
        }

        match info.etag_parts() {
            Some(parts) if preserve_etag => {
                self.copy_etag_preserved(&s, &d, info.size, parts).await?
            }
            _ if info.size <= MANAGED_COPY_THRESHOLD => self.copy_basic(&s, &d).await?,
            _ => {
                let block = self.config().copy_block_size;
                self.copy_managed(&s, &d, info.size, block).await?
            }
        }
        self.invalidate_cache(Some(&d.full()));
        Ok(())
    }

    async fn copy_basic(&self, s: &ObjectPath, d: &ObjectPath) -> VfsResult<()> {
        let source = ObjectRef::new(&s.bucket, &s.key).with_version(s.version_id.clone());
        let mut req = CopyObjectRequest::new(source, &d.bucket, &d.key);
        req.acl = self.config().default_acl.clone();
        let target = d.full();
        debug!(src = %s.full(), dst = %target, "copy object");
        self.call(RemoteOp::CopyObject, &target, || {
            self.backend().copy_object(&req)
        })
        .await?;
        Ok(())
    }

    async fn copy_etag_preserved(
        &self,
        s: &ObjectPath,
        d: &ObjectPath,
        size: u64,
        total_parts: u32,
    ) -> VfsResult<()> {
        let target = d.full();
        debug!(src = %s.full(), dst = %target, total_parts, "etag preserving copy");
        let sizes = try_join_all(
            (1..=total_parts as i32).map(|n| self.head(s, s.version_id.as_deref(), Some(n))),
        )
        .await?;

        let mut ranges = Vec::with_capacity(sizes.len());
        let mut start = 0;
        for head in &sizes {
            let end = (start + head.size).min(size);
            ranges.push(ByteRange::new(start, end));
            start = end;
        }

        let upload_id = self.create_upload(d).await?;
        let source = ObjectRef::new(&s.bucket, &s.key).with_version(s.version_id.clone());
        let copies = ranges.into_iter().enumerate().map(|(i, range)| {
            let req = UploadPartCopyRequest {
                source: source.clone(),
                bucket: d.bucket.clone(),
                key: d.key.clone(),
                upload_id: upload_id.clone(),
                part_number: i as i32 + 1,
                range: Some(range),
            };
            self.copy_part(req, &target)
        });
        let parts = try_join_all(copies).await?;
        self.complete_upload(d, &upload_id, &parts).await
    }

    async fn copy_managed(
        &self,
        s: &ObjectPath,
        d: &ObjectPath,
        size: u64,
        block: u64,
    ) -> VfsResult<()> {
        if !(PART_MIN..=PART_MAX).contains(&block) {
            return Err(VfsError::invalid(format!(
                "copy block size must be between 5 MiB and 5 GiB, got {block}"
            )));
        }
        let target = d.full();
        debug!(src = %s.full(), dst = %target, size, block, "managed copy");
        let upload_id = self.create_upload(d).await?;
        let source = ObjectRef::new(&s.bucket, &s.key).with_version(s.version_id.clone());
        let mut parts = Vec::new();
        for (i, start) in (0..size).step_by(block as usize).enumerate() {
            let req = UploadPartCopyRequest {
                source: source.clone(),
                bucket: d.bucket.clone(),
                key: d.key.clone(),
                upload_id: upload_id.clone(),
                part_number: i as i32 + 1,
                range: Some(ByteRange::new(start, (start + block).min(size))),
            };
            parts.push(self.copy_part(req, &target).await?);
        }
        self.complete_upload(d, &upload_id, &parts).await
    }

    async fn create_upload(&self, d: &ObjectPath) -> VfsResult<String> {
        let opts = self.write_options(None);
        self.call(RemoteOp::CreateMultipartUpload, &d.full(), || {
            self.backend()
                .create_multipart_upload(&d.bucket, &d.key, &opts)
        })
        .await
    }

    async fn copy_part(&self, req: UploadPartCopyRequest, target: &str) -> VfsResult<CompletedPart> {
        let etag = self
            .call(RemoteOp::UploadPartCopy, target, || {
                self.backend().upload_part_copy(&req)
            })
            .await?;
        Ok(CompletedPart {
            part_number: req.part_number,
            etag,
        })
    }

    async fn complete_upload(
        &self,
        d: &ObjectPath,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> VfsResult<()> {
        self.call(RemoteOp::CompleteMultipartUpload, &d.full(), || {
            self.backend()
                .complete_multipart_upload(&d.bucket, &d.key, upload_id, parts)
        })
        .await?;
        Ok(())
    }

    /// Copies a file, or with `recursive` every file below `src` to the same
    /// relative position below `dst`.
    pub async fn copy(&self, src: &str, dst: &str, recursive: bool) -> VfsResult<()> {
        if !recursive {
            return self.cp_file(src, dst, false).await;
        }
        let src = path::normalize(src);
        let dst = path::normalize(dst);
        let files = self.find_names(&src, FindOptions::default()).await?;
        if files.is_empty() {
            return Err(VfsError::not_found(src));
        }
        let pairs: Vec<(String, String)> = files
            .into_iter()
            .map(|f| {
                let rel = f.strip_prefix(&src).unwrap_or(&f).trim_start_matches('/');
                let target = if rel.is_empty() {
                    dst.clone()
                } else {
                    format!("{dst}/{rel}")
                };
                (f.clone(), target)
            })
            .collect();
        try_join_all(pairs.iter().map(|(from, to)| self.cp_file(from, to, false))).await?;
        Ok(())
    }

    /// Copy then delete.
    pub async fn mv(&self, src: &str, dst: &str, recursive: bool) -> VfsResult<()> {
        if path::normalize(src) == path::normalize(dst) {
            return Ok(());
        }
        self.copy(src, dst, recursive).await?;
        self.rm(&[src], recursive, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::MemoryBackend;
    use crate::vfs::config::{FsConfig, MIB};
    use bytes::Bytes;

    fn fs() -> ObjectFs<MemoryBackend> {
        let backend = MemoryBackend::new();
        backend.create_bucket_now("bkt");
        ObjectFs::new(backend, FsConfig::default())
    }

    fn body(len: u64) -> Bytes {
        Bytes::from((0..len as usize).map(|i| (i % 241) as u8).collect::<Vec<u8>>())
    }

    #[tokio::test]
    async fn test_basic_copy() {
        let fs = fs();
        fs.backend().insert_object("bkt", "src", b"payload".to_vec());
        fs.cp_file("bkt/src", "bkt/dst", false).await.unwrap();
        assert_eq!(&fs.backend().object_data("bkt", "dst").unwrap()[..], b"payload");
        assert_eq!(fs.backend().count(RemoteOp::CopyObject), 1);
        assert!(fs.cp_file("bkt/src", "bkt", false).await.is_err());
    }

    #[tokio::test]
    async fn test_copy_to_version_rejected() {
        let backend = MemoryBackend::new();
        backend.insert_object("bkt", "src", b"x".to_vec());
        let fs = ObjectFs::new(backend, FsConfig::default().version_aware(true));
        let err = fs
            .cp_file("bkt/src", "bkt/dst?versionId=abc", false)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::InvalidArgument(_)));
        assert_eq!(fs.backend().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_etag_preserving_copy() {
        let fs = fs();
        let data = body(12 * MIB);
        fs.pipe_file("bkt/src", data.clone(), Some(5 * MIB)).await.unwrap();
        fs.backend().reset_calls();

        fs.cp_file("bkt/src", "bkt/dst", true).await.unwrap();
        let b = fs.backend();
        assert_eq!(b.count(RemoteOp::UploadPartCopy), 3);
        assert_eq!(b.count(RemoteOp::CopyObject), 0);
        let src = b.head_object("bkt", "src", None, None).await.unwrap();
        let dst = b.head_object("bkt", "dst", None, None).await.unwrap();
        assert_eq!(src.etag, dst.etag);
        assert_eq!(&b.object_data("bkt", "dst").unwrap()[..], &data[..]);

        fs.cp_file("bkt/src", "bkt/plain", false).await.unwrap();
        let plain = b.head_object("bkt", "plain", None, None).await.unwrap();
        assert_ne!(plain.etag, src.etag);
    }

    #[tokio::test]
    async fn test_managed_copy_in_blocks() {
        let fs = fs();
        let data = body(12 * MIB);
        fs.backend().insert_object("bkt", "src", data.clone());
        let s = fs.resolve("bkt/src");
        let d = fs.resolve("bkt/dst");
        fs.copy_managed(&s, &d, 12 * MIB, 5 * MIB).await.unwrap();
        assert_eq!(fs.backend().count(RemoteOp::UploadPartCopy), 3);
        assert_eq!(&fs.backend().object_data("bkt", "dst").unwrap()[..], &data[..]);

        assert!(fs.copy_managed(&s, &d, 12 * MIB, MIB).await.is_err());
    }

    #[tokio::test]
    async fn test_recursive_copy_and_move() {
        let fs = fs();
        for key in ["src/a", "src/sub/b"] {
            fs.backend().insert_object("bkt", key, key.as_bytes().to_vec());
        }
        fs.copy("bkt/src", "bkt/copy", true).await.unwrap();
        assert_eq!(&fs.backend().object_data("bkt", "copy/sub/b").unwrap()[..], b"src/sub/b");

        fs.mv("bkt/src", "bkt/moved", true).await.unwrap();
        assert!(fs.backend().object_data("bkt", "src/a").is_none());
        assert_eq!(&fs.backend().object_data("bkt", "moved/a").unwrap()[..], b"src/a");
        assert!(!fs.exists("bkt/src").await.unwrap());
    }

    #[tokio::test]
    async fn test_mv_single_file() {
        let fs = fs();
        fs.backend().insert_object("bkt", "one", b"1".to_vec());
        fs.mv("bkt/one", "bkt/two", false).await.unwrap();
        assert!(fs.backend().object_data("bkt", "one").is_none());
        assert!(fs.isfile("bkt/two").await.unwrap());
    }
}

//! Whole-object transfers: read an object into memory, upload a buffer or a
//! local file, download to a local file.

use crate::cadapter::client::{
    ByteRange, CompletedPart, GetObjectRequest, ObjectBackend, PutOutput, RemoteOp, WriteOptions,
};
use crate::vfs::config::{PART_MAX, PART_MIN};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::fs::ObjectFs;
use crate::vfs::path::{self, ObjectPath};
use bytes::{Bytes, BytesMut};
use futures::future::try_join_all;
use futures::stream::{self, Stream, StreamExt};
use std::collections::BTreeMap;
use std::path::Path;
use std::pin::pin;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Objects at least this large always go through multipart uploads.
const SINGLE_PUT_LIMIT: u64 = PART_MAX;

impl<B: ObjectBackend> ObjectFs<B> {
    pub(crate) async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        opts: &WriteOptions,
    ) -> VfsResult<PutOutput> {
        let target = path::join(bucket, key);
        debug!(path = %target, len = data.len(), "put object");
        self.call(RemoteOp::PutObject, &target, || {
            self.backend()
                .put_object(bucket, key, data.clone(), opts)
        })
        .await
    }

    /// Reads `[start, end)` of an object; both bounds default to the object
    /// edges.
    pub async fn cat_file(
        &self,
        path: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> VfsResult<Bytes> {
        let p = self.resolve(path);
        if p.key.is_empty() {
            return Err(VfsError::invalid(format!("{path} is not an object path")));
        }
        let range = match (start, end) {
            (None, None) => None,
            (start, Some(end)) => {
                let start = start.unwrap_or(0);
                if start >= end {
                    return Ok(Bytes::new());
                }
                Some(ByteRange::new(start, end))
            }
            (Some(start), None) => Some(ByteRange::open_ended(start)),
        };
        let req = GetObjectRequest {
            bucket: p.bucket.clone(),
            key: p.key.clone(),
            version_id: p.version_id.clone(),
            range,
            if_match: None,
        };
        let target = p.full();
        let out = self
            .call(RemoteOp::GetObject, &target, || self.backend().get_object(&req))
            .await?;
        Ok(out.body)
    }

    /// Reads every file matched by `paths`, keyed by path.
    pub async fn cat<S: AsRef<str>>(
        &self,
        paths: &[S],
        recursive: bool,
    ) -> VfsResult<BTreeMap<String, Bytes>> {
        let expanded = self.expand_path(paths, recursive, None).await?;
        let mut files = Vec::new();
        for p in expanded {
            if !self.isdir(&p).await? {
                files.push(p);
            }
        }
        let bodies = try_join_all(files.iter().map(|p| self.cat_file(p, None, None))).await?;
        Ok(files.into_iter().zip(bodies).collect())
    }

    /// Uploads `data` to `path`: one `put_object` below
    /// `min(5 GiB, 2 * chunksize)`, sequential `chunksize` parts above.
    pub async fn pipe_file(&self, path: &str, data: Bytes, chunksize: Option<u64>) -> VfsResult<()> {
        let (p, chunksize) = self.upload_target(path, chunksize)?;
        let opts = self.write_options(None);
        let size = data.len() as u64;
        if size < SINGLE_PUT_LIMIT.min(2 * chunksize) {
            self.put_bytes(&p.bucket, &p.key, data, &opts).await?;
        } else {
            let chunks = (0..size).step_by(chunksize as usize).map(|start| {
                let end = (start + chunksize).min(size);
                Ok::<_, VfsError>(data.slice(start as usize..end as usize))
            });
            self.upload_sequential(&p, stream::iter(chunks), &opts)
                .await?;
        }
        self.invalidate_cache(Some(&p.full()));
        Ok(())
    }

    /// Uploads a local file. A local directory only creates a bucket when
    /// `remote` names one; pseudo directories need no object.
    pub async fn put_file(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
        chunksize: Option<u64>,
    ) -> VfsResult<()> {
        let local = local.as_ref();
        let meta = tokio::fs::metadata(local).await?;
        if meta.is_dir() {
            let p = self.resolve(remote);
            if p.key.is_empty() {
                self.makedirs(remote, true).await?;
            }
            return Ok(());
        }
        let (p, chunksize) = self.upload_target(remote, chunksize)?;
        let opts = self.write_options(None);
        let size = meta.len();
        debug!(local = %local.display(), remote = %p.full(), size, "put file");

        let mut file = tokio::fs::File::open(local).await?;
        if size < SINGLE_PUT_LIMIT.min(2 * chunksize) {
            let mut buf = Vec::with_capacity(size as usize);
            file.read_to_end(&mut buf).await?;
            self.put_bytes(&p.bucket, &p.key, Bytes::from(buf), &opts)
                .await?;
        } else {
            // one chunk in memory at a time
            let chunks = stream::unfold(Some(file), move |file| async move {
                let mut file = file?;
                let mut buf = BytesMut::with_capacity(chunksize as usize);
                while (buf.len() as u64) < chunksize {
                    match file.read_buf(&mut buf).await {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) => return Some((Err(VfsError::from(e)), None)),
                    }
                }
                if buf.is_empty() {
                    None
                } else {
                    Some((Ok(buf.freeze()), Some(file)))
                }
            });
            self.upload_sequential(&p, chunks, &opts).await?;
        }
        self.invalidate_cache(Some(&p.full()));
        Ok(())
    }

    /// Downloads `remote` into `local`. Remote directories become local ones.
    pub async fn get_file(&self, remote: &str, local: impl AsRef<Path>) -> VfsResult<()> {
        let local = local.as_ref();
        if self.isdir(remote).await? {
            tokio::fs::create_dir_all(local).await?;
            return Ok(());
        }
        let body = self.cat_file(remote, None, None).await?;
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        debug!(remote, local = %local.display(), len = body.len(), "get file");
        tokio::fs::write(local, &body).await?;
        Ok(())
    }

    fn upload_target(&self, path: &str, chunksize: Option<u64>) -> VfsResult<(ObjectPath, u64)> {
        let p = self.resolve(path);
        if p.key.is_empty() {
            return Err(VfsError::invalid(format!("{path} is not an object path")));
        }
        if p.version_id.is_some() {
            return Err(VfsError::invalid("cannot write to an explicit version"));
        }
        let chunksize = chunksize.unwrap_or(self.config().pipe_chunk_size);
        if !(PART_MIN..=PART_MAX).contains(&chunksize) {
            return Err(VfsError::invalid(format!(
                "chunk size must be between 5 MiB and 5 GiB, got {chunksize}"
            )));
        }
        Ok((p, chunksize))
    }

    /// Multipart upload of `chunks` one after the other. A failed upload is
    /// left open for `clear_multipart_uploads`.
    async fn upload_sequential(
        &self,
        p: &ObjectPath,
        chunks: impl Stream<Item = VfsResult<Bytes>>,
        opts: &WriteOptions,
    ) -> VfsResult<PutOutput> {
        let target = p.full();
        let upload_id = self
            .call(RemoteOp::CreateMultipartUpload, &target, || {
                self.backend().create_multipart_upload(&p.bucket, &p.key, opts)
            })
            .await?;
        let mut parts = Vec::new();
        let mut chunks = pin!(chunks);
        while let Some(chunk) = chunks.next().await {
            let body = chunk?;
            let part_number = parts.len() as i32 + 1;
            debug!(path = %target, part_number, len = body.len(), "upload part");
            let uploaded = self
                .call(RemoteOp::UploadPart, &target, || {
                    self.backend()
                        .upload_part(&p.bucket, &p.key, &upload_id, part_number, body.clone())
                })
                .await;
            match uploaded {
                Ok(etag) => parts.push(CompletedPart { part_number, etag }),
                Err(e) => {
                    warn!(path = %target, upload_id = %upload_id, "part upload failed, upload left open: {e}");
                    return Err(e);
                }
            }
        }
        self.call(RemoteOp::CompleteMultipartUpload, &target, || {
            self.backend()
                .complete_multipart_upload(&p.bucket, &p.key, &upload_id, &parts)
        })
        .await
    }
}

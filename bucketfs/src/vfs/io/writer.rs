//! Buffered object writer.
//!
//! Data is staged in memory and shipped in block-size parts of a multipart
//! upload. Small objects never open a session: the final flush of a write
//! shorter than one block becomes a single `put_object`.
//!
//! Pipeline:
//! - `write` appends to the buffer; a full block triggers a non-final flush
//! - the first flush opens the multipart session (append mode seeds part 1
//!   with a server-side copy of the existing object)
//! - `plan_parts` cuts the buffer into parts, part numbers are assigned, and
//!   the parts upload concurrently
//! - `close` runs the final flush and commits: touch, single put, or complete

use crate::cadapter::client::{
    CompletedPart, ObjectBackend, ObjectRef, PutOutput, RemoteOp, UploadPartCopyRequest,
    WriteOptions,
};
use crate::vfs::config::{PART_MAX, PART_MIN};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::fs::ObjectFs;
use crate::vfs::xattr::KEY_ACLS;
use bytes::{Bytes, BytesMut};
use futures::future::try_join_all;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    pub acl: Option<String>,
    pub block_size: Option<u64>,
    /// Always rejected; objects cannot be written at an explicit version.
    pub version_id: Option<String>,
    pub content_type: Option<String>,
}

impl WriterOptions {
    pub fn acl(self, acl: impl Into<String>) -> Self {
        Self {
            acl: Some(acl.into()),
            ..self
        }
    }

    pub fn block_size(self, block_size: u64) -> Self {
        Self {
            block_size: Some(block_size),
            ..self
        }
    }

    pub fn content_type(self, content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..self
        }
    }
}

/// Splits `len` buffered bytes into upload parts of `block` bytes.
///
/// A trailing part shorter than a block is merged into its predecessor; if
/// the merged part would exceed `part_max` it is split in half instead.
pub fn plan_parts(len: u64, block: u64, part_max: u64) -> Vec<Range<u64>> {
    let mut parts = Vec::new();
    let block = block.max(1);
    let mut start = 0;
    while start < len {
        let end = (start + block).min(len);
        parts.push(start..end);
        start = end;
    }
    let short_tail = parts.last().is_some_and(|r| r.end - r.start < block);
    if parts.len() >= 2 && short_tail {
        if let (Some(tail), Some(prev)) = (parts.pop(), parts.pop()) {
            let merged = prev.start..tail.end;
            if merged.end - merged.start <= part_max {
                parts.push(merged);
            } else {
                let mid = merged.start + (merged.end - merged.start) / 2;
                parts.push(merged.start..mid);
                parts.push(mid..merged.end);
            }
        }
    }
    parts
}

struct MultipartSession {
    upload_id: String,
    parts: Vec<CompletedPart>,
}

pub struct ObjectWriter<B: ObjectBackend> {
    fs: ObjectFs<B>,
    path: String,
    bucket: String,
    key: String,
    opts: WriteOptions,
    block_size: u64,
    buffer: BytesMut,
    /// Total bytes written, including the existing object when appending.
    loc: u64,
    /// Bytes already shipped; `None` until the first flush.
    offset: Option<u64>,
    session: Option<MultipartSession>,
    append_block: bool,
    forced: bool,
    closed: bool,
    version_id: Option<String>,
}

impl<B: ObjectBackend> ObjectFs<B> {
    /// Opens `path` for writing, replacing any existing object on close.
    pub fn open_write(&self, path: &str, opts: WriterOptions) -> VfsResult<ObjectWriter<B>> {
        let p = self.resolve(path);
        if p.key.is_empty() {
            return Err(VfsError::invalid(format!(
                "attempt to open non key-like path: {path}"
            )));
        }
        if p.version_id.is_some() || opts.version_id.is_some() {
            return Err(VfsError::invalid("cannot write to an explicit version"));
        }
        if let Some(acl) = opts.acl.as_deref() {
            if !KEY_ACLS.contains(&acl) {
                return Err(VfsError::invalid(format!("ACL {acl} not in {KEY_ACLS:?}")));
            }
        }
        let block_size = opts.block_size.unwrap_or(self.config().block_size);
        if !(PART_MIN..=PART_MAX).contains(&block_size) {
            return Err(VfsError::invalid(format!(
                "block size must be between 5 MiB and 5 GiB, got {block_size}"
            )));
        }
        let mut wopts = self.write_options(opts.acl.as_deref());
        wopts.content_type = opts.content_type;
        Ok(ObjectWriter {
            fs: self.clone(),
            path: p.full(),
            bucket: p.bucket,
            key: p.key,
            opts: wopts,
            block_size,
            buffer: BytesMut::new(),
            loc: 0,
            offset: None,
            session: None,
            append_block: false,
            forced: false,
            closed: false,
            version_id: None,
        })
    }

    /// Opens `path` for appending. Existing objects below 5 MiB are pulled into
    /// the buffer; larger ones are reused server-side as the first part.
    pub async fn open_append(&self, path: &str, opts: WriterOptions) -> VfsResult<ObjectWriter<B>> {
        let mut writer = self.open_write(path, opts)?;
        if self.exists(&writer.path).await? {
            let size = self.info(&writer.path).await?.size;
            if size < PART_MIN {
                let existing = self.cat_file(&writer.path, None, None).await?;
                writer.write(&existing).await?;
            } else {
                writer.append_block = true;
            }
            writer.loc = size;
        }
        Ok(writer)
    }
}

impl<B: ObjectBackend> ObjectWriter<B> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Logical position: bytes written so far.
    pub fn tell(&self) -> u64 {
        self.loc
    }

    /// Version created by the commit, on version-aware filesystems.
    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.upload_id.as_str())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        if self.closed {
            return Err(VfsError::invalid(format!("{} is closed", self.path)));
        }
        self.buffer.extend_from_slice(data);
        self.loc += data.len() as u64;
        if self.buffer.len() as u64 >= self.block_size {
            self.flush_inner(false).await?;
        }
        Ok(data.len())
    }

    /// Ships buffered data if at least one block is pending.
    pub async fn flush(&mut self) -> VfsResult<()> {
        self.flush_inner(false).await
    }

    /// Final flush and commit. Closing twice is a no-op; a failed commit still
    /// closes the writer and leaves any session for [`discard`](Self::discard).
    pub async fn close(&mut self) -> VfsResult<()> {
        if self.closed {
            return Ok(());
        }
        let result = if self.forced {
            Ok(())
        } else {
            self.flush_inner(true).await
        };
        self.closed = true;
        result
    }

    /// Aborts the multipart session, if any, and drops the buffer.
    pub async fn discard(&mut self) -> VfsResult<()> {
        self.buffer = BytesMut::new();
        self.closed = true;
        self.abort_session().await
    }

    async fn flush_inner(&mut self, force: bool) -> VfsResult<()> {
        if self.closed {
            return Err(VfsError::invalid(format!("{} is closed", self.path)));
        }
        if force && self.forced {
            return Err(VfsError::invalid("final flush can only happen once"));
        }
        if force {
            self.forced = true;
        }
        if !force && (self.buffer.len() as u64) < self.block_size {
            return Ok(());
        }
        if self.offset.is_none() {
            self.offset = Some(0);
            if let Err(e) = self.initiate_upload().await {
                self.closed = true;
                return Err(e);
            }
        }
        let shipped = self.upload_chunk(force).await?;
        if !force {
            self.offset = Some(self.offset.unwrap_or(0) + shipped);
        }
        Ok(())
    }

    fn single_put(&self) -> bool {
        !self.append_block && self.loc < self.block_size
    }

    async fn initiate_upload(&mut self) -> VfsResult<()> {
        if self.single_put() {
            return Ok(());
        }
        debug!(path = %self.path, "initiating multipart upload");
        let fs = &self.fs;
        let upload_id = fs
            .call(RemoteOp::CreateMultipartUpload, &self.path, || {
                fs.backend()
                    .create_multipart_upload(&self.bucket, &self.key, &self.opts)
            })
            .await?;
        let mut session = MultipartSession {
            upload_id,
            parts: Vec::new(),
        };
        if self.append_block {
            let req = UploadPartCopyRequest {
                source: ObjectRef::new(&self.bucket, &self.key),
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                upload_id: session.upload_id.clone(),
                part_number: 1,
                range: None,
            };
            let etag = fs
                .call(RemoteOp::UploadPartCopy, &self.path, || {
                    fs.backend().upload_part_copy(&req)
                })
                .await?;
            session.parts.push(CompletedPart {
                part_number: 1,
                etag,
            });
        }
        self.session = Some(session);
        Ok(())
    }

    /// Uploads the whole buffer as parts, then commits on the final flush.
    /// Returns the number of bytes shipped.
    async fn upload_chunk(&mut self, last: bool) -> VfsResult<u64> {
        debug!(
            path = %self.path,
            last,
            loc = self.loc,
            buffered = self.buffer.len(),
            "upload chunk"
        );
        let mut shipped = 0;
        if !(last && self.single_put()) {
            let data = std::mem::take(&mut self.buffer).freeze();
            shipped = data.len() as u64;
            let parts = self.upload_parts(data).await?;
            if let Some(session) = self.session.as_mut() {
                session.parts.extend(parts);
            }
        }
        if last {
            self.commit().await?;
        }
        Ok(shipped)
    }

    async fn upload_parts(&self, data: Bytes) -> VfsResult<Vec<CompletedPart>> {
        let Some(session) = self.session.as_ref() else {
            return Err(VfsError::invalid(format!(
                "no multipart session open for {}",
                self.path
            )));
        };
        let ranges = plan_parts(data.len() as u64, self.block_size, PART_MAX);
        let first = session.parts.len() as i32 + 1;
        let sem = Arc::new(Semaphore::new(self.fs.config().max_concurrency.max(1)));
        let uploads = ranges.into_iter().enumerate().map(|(i, r)| {
            let part_number = first + i as i32;
            let body = data.slice(r.start as usize..r.end as usize);
            let sem = sem.clone();
            let fs = &self.fs;
            let upload_id = session.upload_id.as_str();
            async move {
                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|e| VfsError::Io(std::io::Error::other(e)))?;
                debug!(path = %self.path, part_number, len = body.len(), "upload part");
                let etag = fs
                    .call(RemoteOp::UploadPart, &self.path, || {
                        fs.backend().upload_part(
                            &self.bucket,
                            &self.key,
                            upload_id,
                            part_number,
                            body.clone(),
                        )
                    })
                    .await?;
                Ok::<_, VfsError>(CompletedPart { part_number, etag })
            }
        });
        try_join_all(uploads).await
    }

    async fn commit(&mut self) -> VfsResult<()> {
        debug!(path = %self.path, "commit");
        let fs = self.fs.clone();
        let result: PutOutput = if self.loc == 0 {
            debug!(path = %self.path, "empty file committed");
            self.abort_session().await?;
            fs.put_bytes(&self.bucket, &self.key, Bytes::new(), &self.opts)
                .await?
        } else if self.session.as_ref().is_none_or(|s| s.parts.is_empty()) {
            debug!(path = %self.path, "one-shot upload");
            self.abort_session().await?;
            let data = std::mem::take(&mut self.buffer).freeze();
            fs.put_bytes(&self.bucket, &self.key, data, &self.opts)
                .await?
        } else {
            let Some(session) = self.session.as_ref() else {
                return Ok(());
            };
            debug!(path = %self.path, parts = session.parts.len(), "complete multipart upload");
            let out = fs
                .call(RemoteOp::CompleteMultipartUpload, &self.path, || {
                    fs.backend().complete_multipart_upload(
                        &self.bucket,
                        &self.key,
                        &session.upload_id,
                        &session.parts,
                    )
                })
                .await?;
            self.session = None;
            out
        };

        if fs.config().version_aware {
            self.version_id = result.version_id;
        }
        self.buffer = BytesMut::new();
        fs.invalidate_for_new_object(&self.path);
        Ok(())
    }

    async fn abort_session(&mut self) -> VfsResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        debug!(path = %self.path, upload_id = %session.upload_id, "abort multipart upload");
        let fs = &self.fs;
        fs.call(RemoteOp::AbortMultipartUpload, &self.path, || {
            fs.backend()
                .abort_multipart_upload(&self.bucket, &self.key, &session.upload_id)
        })
        .await
    }
}

impl<B: ObjectBackend> Drop for ObjectWriter<B> {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            warn!(
                path = %self.path,
                upload_id = %session.upload_id,
                "writer dropped with an open multipart upload; clear it with clear_multipart_uploads"
            );
        } else if !self.closed && !self.buffer.is_empty() {
            warn!(path = %self.path, buffered = self.buffer.len(), "writer dropped without close, data lost");
        }
    }
}

impl<B: ObjectBackend> std::fmt::Debug for ObjectWriter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectWriter")
            .field("path", &self.path)
            .field("loc", &self.loc)
            .field("upload_id", &self.upload_id())
            .finish()
    }
}

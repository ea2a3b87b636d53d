//! Object store client abstraction.
//!
//! `ObjectBackend` exposes one async method per remote call the filesystem
//! engine issues. Implementations translate requests to their transport and
//! report failures as [`BackendError`]; retries and error classification live
//! in `vfs::gateway`, never here.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure reported by an object store backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The service answered with a decodable error document.
    #[error("{code}: {message}")]
    Service {
        code: String,
        message: String,
        status: Option<u16>,
    },
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The transport could not decode the response; raw status and body are kept
    /// so the gateway can still recover the original error code.
    #[error("undecodable response: {message}")]
    Malformed {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn service(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        BackendError::Service {
            code: code.into(),
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            BackendError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Service { status, .. } | BackendError::Malformed { status, .. } => {
                *status
            }
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }
}

/// Remote operations issued through the gateway, used for logging and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    ListObjectsV2,
    HeadObject,
    GetObject,
    PutObject,
    CreateMultipartUpload,
    UploadPart,
    UploadPartCopy,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    CopyObject,
    DeleteObject,
    DeleteObjects,
    ListMultipartUploads,
    GetObjectTagging,
    PutObjectTagging,
    PutObjectAcl,
    PutBucketAcl,
    CreateBucket,
    DeleteBucket,
    ListBuckets,
    GetBucketVersioning,
    ListObjectVersions,
    PresignGetObject,
}

impl RemoteOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteOp::ListObjectsV2 => "list_objects_v2",
            RemoteOp::HeadObject => "head_object",
            RemoteOp::GetObject => "get_object",
            RemoteOp::PutObject => "put_object",
            RemoteOp::CreateMultipartUpload => "create_multipart_upload",
            RemoteOp::UploadPart => "upload_part",
            RemoteOp::UploadPartCopy => "upload_part_copy",
            RemoteOp::CompleteMultipartUpload => "complete_multipart_upload",
            RemoteOp::AbortMultipartUpload => "abort_multipart_upload",
            RemoteOp::CopyObject => "copy_object",
            RemoteOp::DeleteObject => "delete_object",
            RemoteOp::DeleteObjects => "delete_objects",
            RemoteOp::ListMultipartUploads => "list_multipart_uploads",
            RemoteOp::GetObjectTagging => "get_object_tagging",
            RemoteOp::PutObjectTagging => "put_object_tagging",
            RemoteOp::PutObjectAcl => "put_object_acl",
            RemoteOp::PutBucketAcl => "put_bucket_acl",
            RemoteOp::CreateBucket => "create_bucket",
            RemoteOp::DeleteBucket => "delete_bucket",
            RemoteOp::ListBuckets => "list_buckets",
            RemoteOp::GetBucketVersioning => "get_bucket_versioning",
            RemoteOp::ListObjectVersions => "list_object_versions",
            RemoteOp::PresignGetObject => "presign_get_object",
        }
    }
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: Option<i32>,
    pub continuation_token: Option<String>,
}

impl ListObjectsRequest {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn delimiter(self, delimiter: &str) -> Self {
        let delimiter = (!delimiter.is_empty()).then(|| delimiter.to_string());
        Self { delimiter, ..self }
    }

    pub fn max_keys(self, max_keys: i32) -> Self {
        Self {
            max_keys: Some(max_keys),
            ..self
        }
    }

    pub fn continuation_token(self, continuation_token: Option<String>) -> Self {
        Self {
            continuation_token,
            ..self
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectSummary>,
    /// Common prefixes including their trailing delimiter.
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
}

impl ListObjectsPage {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.common_prefixes.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeadObjectOutput {
    /// Object size, or the size of the requested part when a part number was given.
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub version_id: Option<String>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub parts_count: Option<u32>,
}

/// Half-open byte range `[start, end)`; `end == None` reads to the end of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn open_ended(start: u64) -> Self {
        Self { start, end: None }
    }

    /// HTTP `Range` header value (inclusive end).
    pub fn header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end.saturating_sub(1)),
            None => format!("bytes={}-", self.start),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetObjectRequest {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
    pub range: Option<ByteRange>,
    pub if_match: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GetObjectOutput {
    pub body: Bytes,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// Per-object options for calls that create objects.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub acl: Option<String>,
    pub content_type: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default)]
pub struct PutOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// A fully qualified object, used as copy source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
        }
    }

    pub fn with_version(self, version_id: Option<String>) -> Self {
        Self { version_id, ..self }
    }

    /// `x-amz-copy-source` form: `bucket/url-encoded-key[?versionId=..]`.
    pub fn copy_source(&self) -> String {
        let mut source = format!("{}/{}", self.bucket, urlencoding::encode(&self.key));
        if let Some(version) = &self.version_id {
            source.push_str("?versionId=");
            source.push_str(version);
        }
        source
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct UploadPartCopyRequest {
    pub source: ObjectRef,
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: i32,
    pub range: Option<ByteRange>,
}

#[derive(Debug, Clone)]
pub struct CopyObjectRequest {
    pub source: ObjectRef,
    pub bucket: String,
    pub key: String,
    /// `Some` replaces the user metadata of the destination, `None` copies it.
    pub metadata: Option<HashMap<String, String>>,
    pub content_type: Option<String>,
    pub acl: Option<String>,
}

impl CopyObjectRequest {
    pub fn new(source: ObjectRef, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            source,
            bucket: bucket.into(),
            key: key.into(),
            metadata: None,
            content_type: None,
            acl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteKey {
    pub key: String,
    pub version_id: Option<String>,
}

impl DeleteKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeleteFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct MultipartUploadSummary {
    pub key: String,
    pub upload_id: String,
}

#[derive(Debug, Clone)]
pub struct BucketSummary {
    pub name: String,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub delete_marker: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListVersionsRequest {
    pub bucket: String,
    pub prefix: String,
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListVersionsPage {
    pub versions: Vec<ObjectVersion>,
    pub delete_markers: Vec<ObjectVersion>,
    pub next_key_marker: Option<String>,
    pub next_version_id_marker: Option<String>,
    pub is_truncated: bool,
}

/// Object store client consumed by the filesystem engine.
#[async_trait]
pub trait ObjectBackend: Send + Sync + 'static {
    async fn list_objects_v2(&self, req: &ListObjectsRequest) -> BackendResult<ListObjectsPage>;

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        part_number: Option<i32>,
    ) -> BackendResult<HeadObjectOutput>;

    async fn get_object(&self, req: &GetObjectRequest) -> BackendResult<GetObjectOutput>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: &WriteOptions,
    ) -> BackendResult<PutOutput>;

    /// Returns the upload id of the new session.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: &WriteOptions,
    ) -> BackendResult<String>;

    /// Returns the etag of the uploaded part.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> BackendResult<String>;

    async fn upload_part_copy(&self, req: &UploadPartCopyRequest) -> BackendResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> BackendResult<PutOutput>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> BackendResult<()>;

    async fn copy_object(&self, req: &CopyObjectRequest) -> BackendResult<PutOutput>;

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<()>;

    /// Quiet multi-object delete; only failures are reported.
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[DeleteKey],
    ) -> BackendResult<Vec<DeleteFailure>>;

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> BackendResult<Vec<MultipartUploadSummary>>;

    async fn get_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<HashMap<String, String>>;

    async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        tags: &HashMap<String, String>,
    ) -> BackendResult<()>;

    async fn put_object_acl(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        acl: &str,
    ) -> BackendResult<()>;

    async fn put_bucket_acl(&self, bucket: &str, acl: &str) -> BackendResult<()>;

    async fn create_bucket(
        &self,
        bucket: &str,
        acl: Option<&str>,
        region: Option<&str>,
    ) -> BackendResult<()>;

    async fn delete_bucket(&self, bucket: &str) -> BackendResult<()>;

    async fn list_buckets(&self) -> BackendResult<Vec<BucketSummary>>;

    /// Versioning status (`Enabled`, `Suspended`), `None` when never configured.
    async fn get_bucket_versioning(&self, bucket: &str) -> BackendResult<Option<String>>;

    async fn list_object_versions(
        &self,
        req: &ListVersionsRequest,
    ) -> BackendResult<ListVersionsPage>;

    async fn presign_get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        expires: Duration,
    ) -> BackendResult<String>;

    /// Drops any per-bucket clients the backend keeps.
    async fn clear_region_cache(&self) {}
}

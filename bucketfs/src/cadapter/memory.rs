//! In-process object store, used for tests and the CLI `--memory` mode.
//!
//! Mirrors the behaviour of an S3 bucket closely enough for the filesystem
//! engine: versioning with delete markers, multipart sessions with the minimum
//! part size check, multipart etags (`md5-of-md5s-N`), conditional reads and
//! paginated listings. Every call is recorded so tests can assert on remote
//! traffic, and faults can be queued per operation.

use super::client::*;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_COPY_SIZE: u64 = 5 * 1024 * 1024 * 1024;
const MAX_DELETE_KEYS: usize = 1000;
const DEFAULT_PAGE_SIZE: usize = 1000;

/// A queued failure for the next matching call.
#[derive(Debug, Clone)]
pub enum Fault {
    Timeout,
    Service { code: String, status: u16 },
    Malformed { status: Option<u16>, body: Option<String> },
}

impl Fault {
    pub fn service(code: &str, status: u16) -> Self {
        Fault::Service {
            code: code.to_string(),
            status,
        }
    }

    fn into_error(self, op: RemoteOp) -> BackendError {
        match self {
            Fault::Timeout => BackendError::Timeout(format!("injected timeout in {op}")),
            Fault::Service { code, status } => {
                BackendError::service(code, format!("injected failure in {op}"), status)
            }
            Fault::Malformed { status, body } => BackendError::Malformed {
                message: format!("injected undecodable response in {op}"),
                status,
                body,
            },
        }
    }
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub op: RemoteOp,
    pub target: String,
}

#[derive(Clone)]
struct StoredVersion {
    version_id: String,
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
    content_type: Option<String>,
    metadata: HashMap<String, String>,
    tags: HashMap<String, String>,
    acl: Option<String>,
    part_sizes: Vec<u64>,
    delete_marker: bool,
}

struct PendingUpload {
    key: String,
    opts: WriteOptions,
    parts: BTreeMap<i32, (Bytes, String)>,
}

#[derive(Default)]
struct MemBucket {
    versioned: bool,
    acl: Option<String>,
    created: Option<DateTime<Utc>>,
    /// Versions oldest first; the last one is current.
    objects: BTreeMap<String, Vec<StoredVersion>>,
    uploads: BTreeMap<String, PendingUpload>,
}

impl MemBucket {
    fn current(&self, key: &str) -> Option<&StoredVersion> {
        self.objects
            .get(key)
            .and_then(|versions| versions.last())
            .filter(|v| !v.delete_marker)
    }

    fn version(&self, key: &str, version_id: Option<&str>) -> Option<&StoredVersion> {
        match version_id {
            None => self.current(key),
            Some(id) => self
                .objects
                .get(key)
                .and_then(|versions| versions.iter().find(|v| v.version_id == id))
                .filter(|v| !v.delete_marker),
        }
    }

    fn is_empty(&self) -> bool {
        self.objects.values().all(|v| v.is_empty()) && self.uploads.is_empty()
    }
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, MemBucket>,
    next_version: u64,
    next_upload: u64,
}

impl State {
    fn bucket(&self, name: &str) -> BackendResult<&MemBucket> {
        self.buckets.get(name).ok_or_else(|| no_such_bucket(name))
    }

    fn bucket_mut(&mut self, name: &str) -> BackendResult<&mut MemBucket> {
        self.buckets.get_mut(name).ok_or_else(|| no_such_bucket(name))
    }

    fn new_version_id(&mut self, versioned: bool) -> String {
        if !versioned {
            return "null".to_string();
        }
        self.next_version += 1;
        format!("v{:08}", self.next_version)
    }

    fn store(&mut self, bucket: &str, key: &str, mut version: StoredVersion) -> BackendResult<PutOutput> {
        let versioned = self.bucket(bucket)?.versioned;
        version.version_id = self.new_version_id(versioned);
        let out = PutOutput {
            etag: Some(version.etag.clone()),
            version_id: versioned.then(|| version.version_id.clone()),
        };
        let b = self.bucket_mut(bucket)?;
        let versions = b.objects.entry(key.to_string()).or_default();
        if !versioned {
            versions.clear();
        }
        versions.push(version);
        Ok(out)
    }
}

fn no_such_bucket(bucket: &str) -> BackendError {
    BackendError::service("NoSuchBucket", format!("bucket {bucket} does not exist"), 404)
}

fn no_such_key(bucket: &str, key: &str) -> BackendError {
    BackendError::service("NoSuchKey", format!("{bucket}/{key} does not exist"), 404)
}

fn no_such_upload(upload_id: &str) -> BackendError {
    BackendError::service("NoSuchUpload", format!("upload {upload_id} does not exist"), 404)
}

fn quoted_md5(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(md5::compute(data).0))
}

fn slice_range(data: &Bytes, range: Option<ByteRange>) -> BackendResult<Bytes> {
    let Some(range) = range else {
        return Ok(data.clone());
    };
    let len = data.len() as u64;
    if range.start >= len && !(len == 0 && range.start == 0) {
        return Err(BackendError::service(
            "InvalidRange",
            format!("range start {} beyond object size {len}", range.start),
            416,
        ));
    }
    let end = range.end.unwrap_or(len).min(len);
    Ok(data.slice(range.start as usize..end.max(range.start) as usize))
}

/// In-memory object store implementing [`ObjectBackend`].
pub struct MemoryBackend {
    state: Mutex<State>,
    calls: Mutex<Vec<RecordedCall>>,
    faults: Mutex<VecDeque<(RemoteOp, Fault)>>,
    page_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(VecDeque::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Caps every listing page, to exercise pagination with few objects.
    pub fn with_page_size(self, page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..self
        }
    }

    /// Creates a bucket without going through the call log.
    pub fn create_bucket_now(&self, bucket: &str) {
        let mut state = self.state.lock().unwrap();
        state.buckets.entry(bucket.to_string()).or_insert_with(|| MemBucket {
            created: Some(Utc::now()),
            ..Default::default()
        });
    }

    pub fn set_versioning(&self, bucket: &str, enabled: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(b) = state.buckets.get_mut(bucket) {
            b.versioned = enabled;
        }
    }

    /// Stores an object directly, bypassing faults and the call log.
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        self.create_bucket_now(bucket);
        let mut state = self.state.lock().unwrap();
        let version = StoredVersion {
            version_id: String::new(),
            etag: quoted_md5(&data),
            data,
            last_modified: Utc::now(),
            content_type: None,
            metadata: HashMap::new(),
            tags: HashMap::new(),
            acl: None,
            part_sizes: Vec::new(),
            delete_marker: false,
        };
        let _ = state.store(bucket, key, version);
    }

    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock().unwrap();
        state.buckets.get(bucket)?.current(key).map(|v| v.data.clone())
    }

    pub fn object_acl(&self, bucket: &str, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.buckets.get(bucket)?.current(key)?.acl.clone()
    }

    pub fn bucket_acl(&self, bucket: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.buckets.get(bucket)?.acl.clone()
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.state.lock().unwrap().buckets.contains_key(bucket)
    }

    pub fn pending_uploads(&self, bucket: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.buckets.get(bucket).map(|b| b.uploads.len()).unwrap_or(0)
    }

    /// Number of stored versions and delete markers for `key`.
    pub fn version_count(&self, bucket: &str, key: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Queues `fault` for the next `times` calls of `op`.
    pub fn fail_next(&self, op: RemoteOp, fault: Fault, times: usize) {
        let mut faults = self.faults.lock().unwrap();
        for _ in 0..times {
            faults.push_back((op, fault.clone()));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: RemoteOp) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.op == op).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn enter(&self, op: RemoteOp, target: String) -> BackendResult<()> {
        self.calls.lock().unwrap().push(RecordedCall { op, target });
        let mut faults = self.faults.lock().unwrap();
        if let Some(pos) = faults.iter().position(|(o, _)| *o == op) {
            if let Some((_, fault)) = faults.remove(pos) {
                return Err(fault.into_error(op));
            }
        }
        Ok(())
    }
}

fn head_output(v: &StoredVersion, versioned: bool) -> HeadObjectOutput {
    HeadObjectOutput {
        size: v.data.len() as u64,
        etag: Some(v.etag.clone()),
        last_modified: Some(v.last_modified),
        version_id: versioned.then(|| v.version_id.clone()),
        content_type: v.content_type.clone(),
        metadata: v.metadata.clone(),
        parts_count: (!v.part_sizes.is_empty()).then_some(v.part_sizes.len() as u32),
    }
}

enum Listed {
    Object(ObjectSummary),
    Prefix(String),
}

impl Listed {
    fn sort_key(&self) -> &str {
        match self {
            Listed::Object(o) => &o.key,
            Listed::Prefix(p) => p,
        }
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn list_objects_v2(&self, req: &ListObjectsRequest) -> BackendResult<ListObjectsPage> {
        self.enter(RemoteOp::ListObjectsV2, format!("{}/{}", req.bucket, req.prefix))?;
        let state = self.state.lock().unwrap();
        let bucket = state.bucket(&req.bucket)?;

        let mut items: Vec<Listed> = Vec::new();
        let mut last_prefix: Option<String> = None;
        for (key, _) in bucket.objects.range(req.prefix.clone()..) {
            if !key.starts_with(&req.prefix) {
                break;
            }
            let Some(v) = bucket.current(key) else {
                continue;
            };
            let rest = &key[req.prefix.len()..];
            if let Some(delim) = req.delimiter.as_deref() {
                if let Some(idx) = rest.find(delim) {
                    let common = format!("{}{}", req.prefix, &rest[..idx + delim.len()]);
                    if last_prefix.as_deref() != Some(common.as_str()) {
                        last_prefix = Some(common.clone());
                        items.push(Listed::Prefix(common));
                    }
                    continue;
                }
            }
            items.push(Listed::Object(ObjectSummary {
                key: key.clone(),
                size: v.data.len() as u64,
                etag: Some(v.etag.clone()),
                last_modified: Some(v.last_modified),
                storage_class: Some("STANDARD".to_string()),
            }));
        }
        items.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));

        let max_keys = req
            .max_keys
            .map(|n| n.max(0) as usize)
            .unwrap_or(self.page_size)
            .min(self.page_size);
        let remaining: Vec<Listed> = match &req.continuation_token {
            Some(token) => items
                .into_iter()
                .filter(|i| i.sort_key() > token.as_str())
                .collect(),
            None => items,
        };
        let truncated = remaining.len() > max_keys;
        let mut page = ListObjectsPage::default();
        for item in remaining.into_iter().take(max_keys) {
            match item {
                Listed::Object(o) => page.objects.push(o),
                Listed::Prefix(p) => page.common_prefixes.push(p),
            }
        }
        if truncated {
            let last_object = page.objects.last().map(|o| o.key.clone());
            let last_prefix = page.common_prefixes.last().cloned();
            page.next_continuation_token = last_object.max(last_prefix);
        }
        Ok(page)
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        part_number: Option<i32>,
    ) -> BackendResult<HeadObjectOutput> {
        self.enter(RemoteOp::HeadObject, format!("{bucket}/{key}"))?;
        let state = self.state.lock().unwrap();
        let b = state.bucket(bucket)?;
        let v = b
            .version(key, version_id)
            .ok_or_else(|| BackendError::service("NotFound", "Not Found", 404))?;
        let mut out = head_output(v, b.versioned);
        if let Some(pn) = part_number {
            let size = if v.part_sizes.is_empty() && pn == 1 {
                v.data.len() as u64
            } else {
                *v.part_sizes.get((pn - 1).max(0) as usize).ok_or_else(|| {
                    BackendError::service("InvalidPartNumber", "part number out of range", 416)
                })?
            };
            out.size = size;
        }
        Ok(out)
    }

    async fn get_object(&self, req: &GetObjectRequest) -> BackendResult<GetObjectOutput> {
        self.enter(RemoteOp::GetObject, format!("{}/{}", req.bucket, req.key))?;
        let state = self.state.lock().unwrap();
        let b = state.bucket(&req.bucket)?;
        let v = match req.version_id.as_deref() {
            Some(id) => b.version(&req.key, Some(id)).ok_or_else(|| {
                BackendError::service("NoSuchVersion", format!("version {id} does not exist"), 404)
            })?,
            None => b
                .current(&req.key)
                .ok_or_else(|| no_such_key(&req.bucket, &req.key))?,
        };
        if let Some(expected) = &req.if_match {
            if expected != &v.etag {
                return Err(BackendError::service(
                    "PreconditionFailed",
                    "At least one of the pre-conditions you specified did not hold",
                    412,
                ));
            }
        }
        Ok(GetObjectOutput {
            body: slice_range(&v.data, req.range)?,
            etag: Some(v.etag.clone()),
            version_id: b.versioned.then(|| v.version_id.clone()),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: &WriteOptions,
    ) -> BackendResult<PutOutput> {
        self.enter(RemoteOp::PutObject, format!("{bucket}/{key}"))?;
        let mut state = self.state.lock().unwrap();
        let version = StoredVersion {
            version_id: String::new(),
            etag: quoted_md5(&body),
            data: body,
            last_modified: Utc::now(),
            content_type: opts.content_type.clone(),
            metadata: opts.metadata.clone().unwrap_or_default(),
            tags: HashMap::new(),
            acl: opts.acl.clone(),
            part_sizes: Vec::new(),
            delete_marker: false,
        };
        state.store(bucket, key, version)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: &WriteOptions,
    ) -> BackendResult<String> {
        self.enter(RemoteOp::CreateMultipartUpload, format!("{bucket}/{key}"))?;
        let mut state = self.state.lock().unwrap();
        state.bucket(bucket)?;
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.bucket_mut(bucket)?.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                opts: opts.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> BackendResult<String> {
        self.enter(RemoteOp::UploadPart, format!("{bucket}/{key}#{part_number}"))?;
        let mut state = self.state.lock().unwrap();
        let upload = state
            .bucket_mut(bucket)?
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| no_such_upload(upload_id))?;
        let etag = quoted_md5(&body);
        upload.parts.insert(part_number, (body, etag.clone()));
        Ok(etag)
    }

    async fn upload_part_copy(&self, req: &UploadPartCopyRequest) -> BackendResult<String> {
        self.enter(
            RemoteOp::UploadPartCopy,
            format!("{}/{}#{} <- {}", req.bucket, req.key, req.part_number, req.source),
        )?;
        let mut state = self.state.lock().unwrap();
        let src = state.bucket(&req.source.bucket)?;
        let data = src
            .version(&req.source.key, req.source.version_id.as_deref())
            .ok_or_else(|| no_such_key(&req.source.bucket, &req.source.key))?
            .data
            .clone();
        let body = slice_range(&data, req.range)?;
        let upload = state
            .bucket_mut(&req.bucket)?
            .uploads
            .get_mut(&req.upload_id)
            .filter(|u| u.key == req.key)
            .ok_or_else(|| no_such_upload(&req.upload_id))?;
        let etag = quoted_md5(&body);
        upload.parts.insert(req.part_number, (body, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> BackendResult<PutOutput> {
        self.enter(RemoteOp::CompleteMultipartUpload, format!("{bucket}/{key}"))?;
        let mut state = self.state.lock().unwrap();
        let b = state.bucket_mut(bucket)?;
        let upload = b
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| no_such_upload(upload_id))?;
        if parts.is_empty() {
            return Err(BackendError::service(
                "MalformedXML",
                "complete request lists no parts",
                400,
            ));
        }

        let mut body = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len() * 16);
        let mut part_sizes = Vec::with_capacity(parts.len());
        for (idx, part) in parts.iter().enumerate() {
            if idx > 0 && part.part_number <= parts[idx - 1].part_number {
                return Err(BackendError::service(
                    "InvalidPartOrder",
                    "parts must be listed in ascending order",
                    400,
                ));
            }
            let (data, etag) = upload.parts.get(&part.part_number).ok_or_else(|| {
                BackendError::service("InvalidPart", format!("part {} missing", part.part_number), 400)
            })?;
            if etag != &part.etag {
                return Err(BackendError::service(
                    "InvalidPart",
                    format!("etag mismatch for part {}", part.part_number),
                    400,
                ));
            }
            if idx + 1 < parts.len() && (data.len() as u64) < MIN_PART_SIZE {
                return Err(BackendError::service(
                    "EntityTooSmall",
                    "Your proposed upload is smaller than the minimum allowed size",
                    400,
                ));
            }
            body.extend_from_slice(data);
            digests.extend_from_slice(&md5::compute(data).0);
            part_sizes.push(data.len() as u64);
        }

        let opts = upload.opts.clone();
        b.uploads.remove(upload_id);
        let etag = format!(
            "\"{}-{}\"",
            hex::encode(md5::compute(&digests).0),
            parts.len()
        );
        let version = StoredVersion {
            version_id: String::new(),
            data: body.freeze(),
            etag,
            last_modified: Utc::now(),
            content_type: opts.content_type,
            metadata: opts.metadata.unwrap_or_default(),
            tags: HashMap::new(),
            acl: opts.acl,
            part_sizes,
            delete_marker: false,
        };
        state.store(bucket, key, version)
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> BackendResult<()> {
        self.enter(RemoteOp::AbortMultipartUpload, format!("{bucket}/{key}"))?;
        let mut state = self.state.lock().unwrap();
        state
            .bucket_mut(bucket)?
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| no_such_upload(upload_id))
    }

    async fn copy_object(&self, req: &CopyObjectRequest) -> BackendResult<PutOutput> {
        self.enter(
            RemoteOp::CopyObject,
            format!("{}/{} <- {}", req.bucket, req.key, req.source),
        )?;
        let mut state = self.state.lock().unwrap();
        let src = state
            .bucket(&req.source.bucket)?
            .version(&req.source.key, req.source.version_id.as_deref())
            .ok_or_else(|| no_such_key(&req.source.bucket, &req.source.key))?
            .clone();
        if src.data.len() as u64 > MAX_COPY_SIZE {
            return Err(BackendError::service(
                "InvalidRequest",
                "The specified copy source is larger than the maximum allowable size",
                400,
            ));
        }
        let version = StoredVersion {
            version_id: String::new(),
            etag: quoted_md5(&src.data),
            data: src.data,
            last_modified: Utc::now(),
            content_type: req.content_type.clone().or(src.content_type),
            metadata: req.metadata.clone().unwrap_or(src.metadata),
            tags: src.tags,
            acl: req.acl.clone(),
            part_sizes: Vec::new(),
            delete_marker: false,
        };
        state.store(&req.bucket, &req.key, version)
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<()> {
        self.enter(RemoteOp::DeleteObject, format!("{bucket}/{key}"))?;
        let mut state = self.state.lock().unwrap();
        delete_one(&mut state, bucket, key, version_id)
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[DeleteKey],
    ) -> BackendResult<Vec<DeleteFailure>> {
        self.enter(RemoteOp::DeleteObjects, format!("{bucket} ({} keys)", keys.len()))?;
        if keys.is_empty() || keys.len() > MAX_DELETE_KEYS {
            return Err(BackendError::service(
                "MalformedXML",
                "delete request must name between 1 and 1000 keys",
                400,
            ));
        }
        let mut state = self.state.lock().unwrap();
        state.bucket(bucket)?;
        for k in keys {
            delete_one(&mut state, bucket, &k.key, k.version_id.as_deref())?;
        }
        Ok(Vec::new())
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> BackendResult<Vec<MultipartUploadSummary>> {
        self.enter(RemoteOp::ListMultipartUploads, bucket.to_string())?;
        let state = self.state.lock().unwrap();
        let b = state.bucket(bucket)?;
        Ok(b.uploads
            .iter()
            .filter(|(_, u)| prefix.is_none_or(|p| u.key.starts_with(p)))
            .map(|(id, u)| MultipartUploadSummary {
                key: u.key.clone(),
                upload_id: id.clone(),
            })
            .collect())
    }

    async fn get_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<HashMap<String, String>> {
        self.enter(RemoteOp::GetObjectTagging, format!("{bucket}/{key}"))?;
        let state = self.state.lock().unwrap();
        state
            .bucket(bucket)?
            .version(key, version_id)
            .map(|v| v.tags.clone())
            .ok_or_else(|| no_such_key(bucket, key))
    }

    async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        tags: &HashMap<String, String>,
    ) -> BackendResult<()> {
        self.enter(RemoteOp::PutObjectTagging, format!("{bucket}/{key}"))?;
        let mut state = self.state.lock().unwrap();
        let v = version_mut(&mut state, bucket, key, version_id)?;
        v.tags = tags.clone();
        Ok(())
    }

    async fn put_object_acl(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        acl: &str,
    ) -> BackendResult<()> {
        self.enter(RemoteOp::PutObjectAcl, format!("{bucket}/{key}"))?;
        let mut state = self.state.lock().unwrap();
        let v = version_mut(&mut state, bucket, key, version_id)?;
        v.acl = Some(acl.to_string());
        Ok(())
    }

    async fn put_bucket_acl(&self, bucket: &str, acl: &str) -> BackendResult<()> {
        self.enter(RemoteOp::PutBucketAcl, bucket.to_string())?;
        let mut state = self.state.lock().unwrap();
        state.bucket_mut(bucket)?.acl = Some(acl.to_string());
        Ok(())
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        acl: Option<&str>,
        _region: Option<&str>,
    ) -> BackendResult<()> {
        self.enter(RemoteOp::CreateBucket, bucket.to_string())?;
        if bucket.is_empty() || bucket.contains('/') {
            return Err(BackendError::service(
                "InvalidBucketName",
                format!("invalid bucket name {bucket:?}"),
                400,
            ));
        }
        let mut state = self.state.lock().unwrap();
        if state.buckets.contains_key(bucket) {
            return Err(BackendError::service(
                "BucketAlreadyOwnedByYou",
                format!("bucket {bucket} already exists"),
                409,
            ));
        }
        state.buckets.insert(
            bucket.to_string(),
            MemBucket {
                acl: acl.map(str::to_string),
                created: Some(Utc::now()),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> BackendResult<()> {
        self.enter(RemoteOp::DeleteBucket, bucket.to_string())?;
        let mut state = self.state.lock().unwrap();
        if !state.bucket(bucket)?.is_empty() {
            return Err(BackendError::service(
                "BucketNotEmpty",
                "The bucket you tried to delete is not empty",
                409,
            ));
        }
        state.buckets.remove(bucket);
        Ok(())
    }

    async fn list_buckets(&self) -> BackendResult<Vec<BucketSummary>> {
        self.enter(RemoteOp::ListBuckets, String::new())?;
        let state = self.state.lock().unwrap();
        Ok(state
            .buckets
            .iter()
            .map(|(name, b)| BucketSummary {
                name: name.clone(),
                created: b.created,
            })
            .collect())
    }

    async fn get_bucket_versioning(&self, bucket: &str) -> BackendResult<Option<String>> {
        self.enter(RemoteOp::GetBucketVersioning, bucket.to_string())?;
        let state = self.state.lock().unwrap();
        Ok(state
            .bucket(bucket)?
            .versioned
            .then(|| "Enabled".to_string()))
    }

    async fn list_object_versions(
        &self,
        req: &ListVersionsRequest,
    ) -> BackendResult<ListVersionsPage> {
        self.enter(RemoteOp::ListObjectVersions, format!("{}/{}", req.bucket, req.prefix))?;
        let state = self.state.lock().unwrap();
        let b = state.bucket(&req.bucket)?;

        // Newest version first within each key, keys ascending.
        let mut all: Vec<ObjectVersion> = Vec::new();
        for (key, versions) in b.objects.range(req.prefix.clone()..) {
            if !key.starts_with(&req.prefix) {
                break;
            }
            let latest = versions.len().saturating_sub(1);
            for (idx, v) in versions.iter().enumerate().rev() {
                all.push(ObjectVersion {
                    key: key.clone(),
                    version_id: v.version_id.clone(),
                    is_latest: idx == latest,
                    size: v.data.len() as u64,
                    etag: (!v.delete_marker).then(|| v.etag.clone()),
                    last_modified: Some(v.last_modified),
                    delete_marker: v.delete_marker,
                });
            }
        }

        let start = match (&req.key_marker, &req.version_id_marker) {
            (Some(key), Some(version)) if !key.is_empty() => all
                .iter()
                .position(|v| &v.key == key && &v.version_id == version)
                .map(|p| p + 1)
                .unwrap_or(all.len()),
            (Some(key), _) if !key.is_empty() => {
                all.iter().position(|v| &v.key > key).unwrap_or(all.len())
            }
            _ => 0,
        };
        let rest = &all[start..];
        let take = rest.len().min(self.page_size);
        let mut page = ListVersionsPage {
            is_truncated: rest.len() > take,
            ..Default::default()
        };
        for v in &rest[..take] {
            if v.delete_marker {
                page.delete_markers.push(v.clone());
            } else {
                page.versions.push(v.clone());
            }
        }
        if page.is_truncated {
            if let Some(last) = rest[..take].last() {
                page.next_key_marker = Some(last.key.clone());
                page.next_version_id_marker = Some(last.version_id.clone());
            }
        }
        Ok(page)
    }

    async fn presign_get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        expires: Duration,
    ) -> BackendResult<String> {
        self.enter(RemoteOp::PresignGetObject, format!("{bucket}/{key}"))?;
        let mut url = format!(
            "memory://{bucket}/{}?X-Amz-Expires={}",
            urlencoding::encode(key),
            expires.as_secs()
        );
        if let Some(v) = version_id {
            url.push_str("&versionId=");
            url.push_str(v);
        }
        Ok(url)
    }
}

fn version_mut<'a>(
    state: &'a mut State,
    bucket: &str,
    key: &str,
    version_id: Option<&str>,
) -> BackendResult<&'a mut StoredVersion> {
    let b = state.bucket_mut(bucket)?;
    let versions = b
        .objects
        .get_mut(key)
        .ok_or_else(|| no_such_key(bucket, key))?;
    let found = match version_id {
        Some(id) => versions.iter_mut().find(|v| v.version_id == id),
        None => versions.last_mut(),
    };
    found
        .filter(|v| !v.delete_marker)
        .ok_or_else(|| no_such_key(bucket, key))
}

fn delete_one(
    state: &mut State,
    bucket: &str,
    key: &str,
    version_id: Option<&str>,
) -> BackendResult<()> {
    let versioned = state.bucket(bucket)?.versioned;
    let marker_id = match (versioned, version_id) {
        (true, None) => Some(state.new_version_id(true)),
        _ => None,
    };
    let b = state.bucket_mut(bucket)?;
    match (version_id, marker_id) {
        (Some(id), _) => {
            if let Some(versions) = b.objects.get_mut(key) {
                versions.retain(|v| v.version_id != id);
                if versions.is_empty() {
                    b.objects.remove(key);
                }
            }
        }
        (None, Some(marker)) => {
            if b.objects.contains_key(key) {
                b.objects.entry(key.to_string()).or_default().push(StoredVersion {
                    version_id: marker,
                    data: Bytes::new(),
                    etag: String::new(),
                    last_modified: Utc::now(),
                    content_type: None,
                    metadata: HashMap::new(),
                    tags: HashMap::new(),
                    acl: None,
                    part_sizes: Vec::new(),
                    delete_marker: true,
                });
            }
        }
        (None, None) => {
            b.objects.remove(key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        let b = MemoryBackend::new();
        b.create_bucket_now("bkt");
        b
    }

    #[tokio::test]
    async fn test_list_with_delimiter_and_pages() {
        let b = backend().with_page_size(2);
        for key in ["a/1", "a/2", "b", "c/x/y", "d"] {
            b.insert_object("bkt", key, "x");
        }
        let req = ListObjectsRequest::new("bkt", "").delimiter("/");
        let first = b.list_objects_v2(&req).await.unwrap();
        assert_eq!(first.common_prefixes, vec!["a/".to_string()]);
        assert_eq!(first.objects.len(), 1);
        assert_eq!(first.objects[0].key, "b");
        assert!(first.next_continuation_token.is_some());

        let second = b
            .list_objects_v2(&req.clone().continuation_token(first.next_continuation_token))
            .await
            .unwrap();
        assert_eq!(second.common_prefixes, vec!["c/".to_string()]);
        assert_eq!(second.objects[0].key, "d");
        assert!(second.next_continuation_token.is_none());
    }

    #[tokio::test]
    async fn test_multipart_rejects_small_inner_parts() {
        let b = backend();
        let id = b
            .create_multipart_upload("bkt", "big", &WriteOptions::default())
            .await
            .unwrap();
        let e1 = b
            .upload_part("bkt", "big", &id, 1, Bytes::from_static(b"tiny"))
            .await
            .unwrap();
        let e2 = b
            .upload_part("bkt", "big", &id, 2, Bytes::from_static(b"tail"))
            .await
            .unwrap();
        let parts = vec![
            CompletedPart { part_number: 1, etag: e1 },
            CompletedPart { part_number: 2, etag: e2 },
        ];
        let err = b
            .complete_multipart_upload("bkt", "big", &id, &parts)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("EntityTooSmall"));
        // The session survives a failed complete.
        assert_eq!(b.pending_uploads("bkt"), 1);
    }

    #[tokio::test]
    async fn test_multipart_etag_and_part_sizes() {
        let b = backend();
        let id = b
            .create_multipart_upload("bkt", "big", &WriteOptions::default())
            .await
            .unwrap();
        let first = Bytes::from(vec![1u8; MIN_PART_SIZE as usize]);
        let e1 = b.upload_part("bkt", "big", &id, 1, first).await.unwrap();
        let e2 = b
            .upload_part("bkt", "big", &id, 2, Bytes::from_static(b"end"))
            .await
            .unwrap();
        let out = b
            .complete_multipart_upload(
                "bkt",
                "big",
                &id,
                &[
                    CompletedPart { part_number: 1, etag: e1 },
                    CompletedPart { part_number: 2, etag: e2 },
                ],
            )
            .await
            .unwrap();
        assert!(out.etag.unwrap().ends_with("-2\""));
        let head = b.head_object("bkt", "big", None, Some(2)).await.unwrap();
        assert_eq!(head.size, 3);
        assert_eq!(head.parts_count, Some(2));
    }

    #[tokio::test]
    async fn test_versioned_delete_leaves_marker() {
        let b = backend();
        b.set_versioning("bkt", true);
        b.insert_object("bkt", "k", "one");
        b.insert_object("bkt", "k", "two");
        b.delete_object("bkt", "k", None).await.unwrap();
        assert!(b.object_data("bkt", "k").is_none());
        assert_eq!(b.version_count("bkt", "k"), 3);

        let page = b
            .list_object_versions(&ListVersionsRequest {
                bucket: "bkt".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.versions.len(), 2);
        assert_eq!(page.delete_markers.len(), 1);
        assert!(page.delete_markers[0].is_latest);
    }

    #[tokio::test]
    async fn test_if_match_and_faults() {
        let b = backend();
        b.insert_object("bkt", "k", "hello");
        let err = b
            .get_object(&GetObjectRequest {
                bucket: "bkt".into(),
                key: "k".into(),
                if_match: Some("\"stale\"".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("PreconditionFailed"));

        b.fail_next(RemoteOp::HeadObject, Fault::Timeout, 1);
        assert!(b.head_object("bkt", "k", None, None).await.unwrap_err().is_transient());
        assert!(b.head_object("bkt", "k", None, None).await.is_ok());
        assert_eq!(b.count(RemoteOp::HeadObject), 2);
    }
}

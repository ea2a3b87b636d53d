//! S3 adapter built on aws-sdk-s3.
//!
//! Requests are sent once; retry policy belongs to the gateway. SDK failures
//! are flattened into [`BackendError`], keeping the raw HTTP status and body
//! of responses the SDK could not decode.

use super::client::*;
use super::region::RegionCache;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as SdkDateTime};
use aws_sdk_s3::types::{
    BucketCannedAcl, BucketLocationConstraint, CompletedMultipartUpload,
    CompletedPart as SdkCompletedPart, CreateBucketConfiguration, Delete, MetadataDirective,
    ObjectCannedAcl, ObjectIdentifier, RequestPayer, ServerSideEncryption, Tag, Tagging,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// S3 connection options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Custom endpoint, e.g. a MinIO or rustfs deployment.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub force_path_style: bool,
    /// Send unsigned requests.
    pub anonymous: bool,
    /// Add `x-amz-request-payer: requester` to object requests.
    pub requester_pays: bool,
    pub server_side_encryption: Option<String>,
    pub sse_kms_key_id: Option<String>,
    /// Resolve and keep one client per bucket region.
    pub cache_regions: bool,
    /// Send Content-MD5 with uploads.
    pub content_md5: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: None,
            force_path_style: false,
            anonymous: false,
            requester_pays: false,
            server_side_encryption: None,
            sse_kms_key_id: None,
            cache_regions: false,
            content_md5: true,
        }
    }
}

pub struct S3Backend {
    client: Client,
    config: S3Config,
    regions: RegionCache<Client>,
}

impl S3Backend {
    pub async fn new(config: S3Config) -> BackendResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if config.anonymous {
            loader = loader.no_credentials();
        }
        let shared = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());
        Ok(Self::from_client(client, config))
    }

    pub fn from_client(client: Client, config: S3Config) -> Self {
        Self {
            client,
            config,
            regions: RegionCache::new(),
        }
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    async fn client_for(&self, bucket: &str) -> BackendResult<Client> {
        if !self.config.cache_regions || bucket.is_empty() {
            return Ok(self.client.clone());
        }
        let base = self.client.clone();
        let name = bucket.to_string();
        self.regions
            .get_or_resolve(bucket, async move {
                let out = base
                    .get_bucket_location()
                    .bucket(&name)
                    .send()
                    .await
                    .map_err(map_sdk_error)?;
                let region = match out.location_constraint().map(|c| c.as_str()) {
                    None | Some("") => "us-east-1",
                    Some("EU") => "eu-west-1",
                    Some(other) => other,
                }
                .to_string();
                debug!(bucket = %name, %region, "resolved bucket region");
                let conf = base.config().to_builder().region(Region::new(region)).build();
                Ok::<_, BackendError>(Client::from_conf(conf))
            })
            .await
            .map_err(|e| (*e).clone())
    }

    fn request_payer(&self) -> Option<RequestPayer> {
        self.config.requester_pays.then_some(RequestPayer::Requester)
    }

    fn sse(&self) -> Option<ServerSideEncryption> {
        self.config
            .server_side_encryption
            .as_deref()
            .map(ServerSideEncryption::from)
    }

    fn md5_base64(&self, data: &[u8]) -> Option<String> {
        self.config
            .content_md5
            .then(|| B64.encode(md5::compute(data).0))
    }
}

/// Flattens an SDK error into a [`BackendError`].
pub(crate) fn map_sdk_error<E>(err: SdkError<E, HttpResponse>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) => BackendError::Timeout(message),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => BackendError::Timeout(message),
        SdkError::ResponseError(resp) => {
            let raw = resp.raw();
            BackendError::Malformed {
                message,
                status: Some(raw.status().as_u16()),
                body: raw
                    .body()
                    .bytes()
                    .map(|b| String::from_utf8_lossy(b).into_owned()),
            }
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let code = err
                .code()
                .map(str::to_string)
                .unwrap_or_else(|| status_code_name(status).to_string());
            BackendError::Service {
                code,
                message: err.message().unwrap_or_default().to_string(),
                status: Some(status),
            }
        }
        _ => BackendError::Other(message),
    }
}

fn status_code_name(status: u16) -> &'static str {
    match status {
        403 => "AccessDenied",
        404 => "NotFound",
        409 => "Conflict",
        412 => "PreconditionFailed",
        _ => "Unknown",
    }
}

fn to_chrono(dt: Option<&SdkDateTime>) -> Option<DateTime<Utc>> {
    dt.and_then(|d| DateTime::from_timestamp(d.secs(), d.subsec_nanos()))
}

fn build_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::Other(format!("invalid request: {e}"))
}

fn size_of(len: Option<i64>) -> u64 {
    len.unwrap_or_default().max(0) as u64
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn list_objects_v2(&self, req: &ListObjectsRequest) -> BackendResult<ListObjectsPage> {
        let client = self.client_for(&req.bucket).await?;
        let out = client
            .list_objects_v2()
            .bucket(&req.bucket)
            .prefix(&req.prefix)
            .set_delimiter(req.delimiter.clone())
            .set_max_keys(req.max_keys)
            .set_continuation_token(req.continuation_token.clone())
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;

        let objects = out
            .contents()
            .iter()
            .filter_map(|o| {
                Some(ObjectSummary {
                    key: o.key()?.to_string(),
                    size: size_of(o.size()),
                    etag: o.e_tag().map(str::to_string),
                    last_modified: to_chrono(o.last_modified()),
                    storage_class: o.storage_class().map(|c| c.as_str().to_string()),
                })
            })
            .collect();
        let common_prefixes = out
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();
        let next_continuation_token = match out.is_truncated() {
            Some(true) => out.next_continuation_token().map(str::to_string),
            _ => None,
        };
        Ok(ListObjectsPage {
            objects,
            common_prefixes,
            next_continuation_token,
        })
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        part_number: Option<i32>,
    ) -> BackendResult<HeadObjectOutput> {
        let client = self.client_for(bucket).await?;
        let out = client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .set_part_number(part_number)
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(HeadObjectOutput {
            size: size_of(out.content_length()),
            etag: out.e_tag().map(str::to_string),
            last_modified: to_chrono(out.last_modified()),
            version_id: out.version_id().map(str::to_string),
            content_type: out.content_type().map(str::to_string),
            metadata: out.metadata().cloned().unwrap_or_default(),
            parts_count: out.parts_count().map(|n| n.max(0) as u32),
        })
    }

    async fn get_object(&self, req: &GetObjectRequest) -> BackendResult<GetObjectOutput> {
        let client = self.client_for(&req.bucket).await?;
        let out = client
            .get_object()
            .bucket(&req.bucket)
            .key(&req.key)
            .set_version_id(req.version_id.clone())
            .set_range(req.range.map(|r| r.header()))
            .set_if_match(req.if_match.clone())
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        let etag = out.e_tag().map(str::to_string);
        let version_id = out.version_id().map(str::to_string);
        let body = out
            .body
            .collect()
            .await
            .map_err(|e| BackendError::Other(format!("reading body of {}/{}: {e}", req.bucket, req.key)))?
            .into_bytes();
        Ok(GetObjectOutput {
            body,
            etag,
            version_id,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: &WriteOptions,
    ) -> BackendResult<PutOutput> {
        let client = self.client_for(bucket).await?;
        let checksum = self.md5_base64(&body);
        let out = client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_md5(checksum)
            .set_acl(opts.acl.as_deref().map(ObjectCannedAcl::from))
            .set_content_type(opts.content_type.clone())
            .set_metadata(opts.metadata.clone())
            .set_server_side_encryption(self.sse())
            .set_ssekms_key_id(self.config.sse_kms_key_id.clone())
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(PutOutput {
            etag: out.e_tag().map(str::to_string),
            version_id: out.version_id().map(str::to_string),
        })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: &WriteOptions,
    ) -> BackendResult<String> {
        let client = self.client_for(bucket).await?;
        let out = client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_acl(opts.acl.as_deref().map(ObjectCannedAcl::from))
            .set_content_type(opts.content_type.clone())
            .set_metadata(opts.metadata.clone())
            .set_server_side_encryption(self.sse())
            .set_ssekms_key_id(self.config.sse_kms_key_id.clone())
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        out.upload_id()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Other(format!("no upload id returned for {bucket}/{key}")))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> BackendResult<String> {
        let client = self.client_for(bucket).await?;
        let checksum = self.md5_base64(&body);
        let out = client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .set_content_md5(checksum)
            .body(ByteStream::from(body))
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        out.e_tag()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Other(format!("no etag for part {part_number} of {bucket}/{key}")))
    }

    async fn upload_part_copy(&self, req: &UploadPartCopyRequest) -> BackendResult<String> {
        let client = self.client_for(&req.bucket).await?;
        let out = client
            .upload_part_copy()
            .bucket(&req.bucket)
            .key(&req.key)
            .upload_id(&req.upload_id)
            .part_number(req.part_number)
            .copy_source(req.source.copy_source())
            .set_copy_source_range(req.range.map(|r| r.header()))
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        out.copy_part_result()
            .and_then(|r| r.e_tag())
            .map(str::to_string)
            .ok_or_else(|| {
                BackendError::Other(format!(
                    "no etag for copied part {} of {}/{}",
                    req.part_number, req.bucket, req.key
                ))
            })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> BackendResult<PutOutput> {
        let client = self.client_for(bucket).await?;
        let completed = parts
            .iter()
            .map(|p| {
                SdkCompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect::<Vec<_>>();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();
        let out = client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(PutOutput {
            etag: out.e_tag().map(str::to_string),
            version_id: out.version_id().map(str::to_string),
        })
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> BackendResult<()> {
        let client = self.client_for(bucket).await?;
        client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn copy_object(&self, req: &CopyObjectRequest) -> BackendResult<PutOutput> {
        let client = self.client_for(&req.bucket).await?;
        let directive = req.metadata.as_ref().map(|_| MetadataDirective::Replace);
        let out = client
            .copy_object()
            .bucket(&req.bucket)
            .key(&req.key)
            .copy_source(req.source.copy_source())
            .set_metadata(req.metadata.clone())
            .set_metadata_directive(directive)
            .set_content_type(req.content_type.clone())
            .set_acl(req.acl.as_deref().map(ObjectCannedAcl::from))
            .set_server_side_encryption(self.sse())
            .set_ssekms_key_id(self.config.sse_kms_key_id.clone())
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(PutOutput {
            etag: out
                .copy_object_result()
                .and_then(|r| r.e_tag())
                .map(str::to_string),
            version_id: out.version_id().map(str::to_string),
        })
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<()> {
        let client = self.client_for(bucket).await?;
        client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[DeleteKey],
    ) -> BackendResult<Vec<DeleteFailure>> {
        let client = self.client_for(bucket).await?;
        let objects = keys
            .iter()
            .map(|k| {
                ObjectIdentifier::builder()
                    .key(&k.key)
                    .set_version_id(k.version_id.clone())
                    .build()
                    .map_err(build_error)
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(build_error)?;
        let out = client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(out
            .errors()
            .iter()
            .map(|e| DeleteFailure {
                key: e.key().unwrap_or_default().to_string(),
                code: e.code().unwrap_or_default().to_string(),
                message: e.message().unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> BackendResult<Vec<MultipartUploadSummary>> {
        let client = self.client_for(bucket).await?;
        let mut uploads = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;
        loop {
            let out = client
                .list_multipart_uploads()
                .bucket(bucket)
                .set_prefix(prefix.map(str::to_string))
                .set_key_marker(key_marker.take())
                .set_upload_id_marker(upload_id_marker.take())
                .send()
                .await
                .map_err(map_sdk_error)?;
            uploads.extend(out.uploads().iter().filter_map(|u| {
                Some(MultipartUploadSummary {
                    key: u.key()?.to_string(),
                    upload_id: u.upload_id()?.to_string(),
                })
            }));
            if out.is_truncated() != Some(true) {
                break;
            }
            key_marker = out.next_key_marker().map(str::to_string);
            upload_id_marker = out.next_upload_id_marker().map(str::to_string);
            if key_marker.is_none() && upload_id_marker.is_none() {
                break;
            }
        }
        Ok(uploads)
    }

    async fn get_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BackendResult<HashMap<String, String>> {
        let client = self.client_for(bucket).await?;
        let out = client
            .get_object_tagging()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .set_request_payer(self.request_payer())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(out
            .tag_set()
            .iter()
            .map(|t| (t.key().to_string(), t.value().to_string()))
            .collect())
    }

    async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        tags: &HashMap<String, String>,
    ) -> BackendResult<()> {
        let client = self.client_for(bucket).await?;
        let tag_set = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build().map_err(build_error))
            .collect::<BackendResult<Vec<_>>>()?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(build_error)?;
        client
            .put_object_tagging()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .tagging(tagging)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn put_object_acl(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        acl: &str,
    ) -> BackendResult<()> {
        let client = self.client_for(bucket).await?;
        client
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .acl(ObjectCannedAcl::from(acl))
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn put_bucket_acl(&self, bucket: &str, acl: &str) -> BackendResult<()> {
        let client = self.client_for(bucket).await?;
        client
            .put_bucket_acl()
            .bucket(bucket)
            .acl(BucketCannedAcl::from(acl))
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        acl: Option<&str>,
        region: Option<&str>,
    ) -> BackendResult<()> {
        let location = region.or(self.config.region.as_deref()).map(|r| {
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(r))
                .build()
        });
        self.client
            .create_bucket()
            .bucket(bucket)
            .set_acl(acl.map(BucketCannedAcl::from))
            .set_create_bucket_configuration(location)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> BackendResult<()> {
        let client = self.client_for(bucket).await?;
        client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn list_buckets(&self) -> BackendResult<Vec<BucketSummary>> {
        let out = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(out
            .buckets()
            .iter()
            .filter_map(|b| {
                Some(BucketSummary {
                    name: b.name()?.to_string(),
                    created: to_chrono(b.creation_date()),
                })
            })
            .collect())
    }

    async fn get_bucket_versioning(&self, bucket: &str) -> BackendResult<Option<String>> {
        let client = self.client_for(bucket).await?;
        let out = client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(out.status().map(|s| s.as_str().to_string()))
    }

    async fn list_object_versions(
        &self,
        req: &ListVersionsRequest,
    ) -> BackendResult<ListVersionsPage> {
        let client = self.client_for(&req.bucket).await?;
        let out = client
            .list_object_versions()
            .bucket(&req.bucket)
            .prefix(&req.prefix)
            .set_key_marker(req.key_marker.clone().filter(|m| !m.is_empty()))
            .set_version_id_marker(req.version_id_marker.clone().filter(|m| !m.is_empty()))
            .send()
            .await
            .map_err(map_sdk_error)?;
        let versions = out
            .versions()
            .iter()
            .filter_map(|v| {
                Some(ObjectVersion {
                    key: v.key()?.to_string(),
                    version_id: v.version_id()?.to_string(),
                    is_latest: v.is_latest().unwrap_or(false),
                    size: size_of(v.size()),
                    etag: v.e_tag().map(str::to_string),
                    last_modified: to_chrono(v.last_modified()),
                    delete_marker: false,
                })
            })
            .collect();
        let delete_markers = out
            .delete_markers()
            .iter()
            .filter_map(|m| {
                Some(ObjectVersion {
                    key: m.key()?.to_string(),
                    version_id: m.version_id()?.to_string(),
                    is_latest: m.is_latest().unwrap_or(false),
                    size: 0,
                    etag: None,
                    last_modified: to_chrono(m.last_modified()),
                    delete_marker: true,
                })
            })
            .collect();
        Ok(ListVersionsPage {
            versions,
            delete_markers,
            next_key_marker: out.next_key_marker().map(str::to_string),
            next_version_id_marker: out.next_version_id_marker().map(str::to_string),
            is_truncated: out.is_truncated().unwrap_or(false),
        })
    }

    async fn presign_get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        expires: Duration,
    ) -> BackendResult<String> {
        let client = self.client_for(bucket).await?;
        let presigning = PresigningConfig::expires_in(expires).map_err(build_error)?;
        let req = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .presigned(presigning)
            .await
            .map_err(map_sdk_error)?;
        Ok(req.uri().to_string())
    }

    async fn clear_region_cache(&self) {
        self.regions.clear();
    }
}

#[cfg(test)]
mod tests {
    //! These tests need credentials and a scratch bucket.
    //! Set BUCKETFS_TEST_S3_BUCKET (and optionally BUCKETFS_TEST_S3_ENDPOINT) to run them.

    use super::*;

    async fn get_test_backend() -> Option<(S3Backend, String)> {
        let bucket = std::env::var("BUCKETFS_TEST_S3_BUCKET").ok()?;
        let config = S3Config {
            endpoint: std::env::var("BUCKETFS_TEST_S3_ENDPOINT").ok(),
            force_path_style: true,
            ..Default::default()
        };
        Some((S3Backend::new(config).await.ok()?, bucket))
    }

    #[test]
    fn test_status_fallback_names() {
        assert_eq!(status_code_name(404), "NotFound");
        assert_eq!(status_code_name(403), "AccessDenied");
        assert_eq!(status_code_name(500), "Unknown");
    }

    #[test]
    fn test_default_config_sends_md5() {
        let config = S3Config::default();
        assert!(config.content_md5);
        assert!(!config.cache_regions);
    }

    #[tokio::test]
    #[ignore] // Requires real S3 credentials and bucket
    async fn test_s3_put_head_get_delete() -> Result<(), Box<dyn std::error::Error>> {
        let (backend, bucket) = get_test_backend()
            .await
            .expect("Set BUCKETFS_TEST_S3_BUCKET env var");
        let key = "bucketfs-test/basic";

        backend
            .put_object(&bucket, key, Bytes::from_static(b"hello"), &WriteOptions::default())
            .await?;
        let head = backend.head_object(&bucket, key, None, None).await?;
        assert_eq!(head.size, 5);

        let got = backend
            .get_object(&GetObjectRequest {
                bucket: bucket.clone(),
                key: key.to_string(),
                range: Some(ByteRange::new(1, 3)),
                ..Default::default()
            })
            .await?;
        assert_eq!(&got.body[..], b"el");

        backend.delete_object(&bucket, key, None).await?;
        let err = backend.head_object(&bucket, key, None, None).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        Ok(())
    }
}

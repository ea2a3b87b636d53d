//! Operations that change the remote namespace: create, delete, assemble.
//!
//! Every successful mutation invalidates the directory cache for the paths
//! it touched, after the remote call returned.

use crate::cadapter::client::{
    BackendError, CompletedPart, DeleteKey, ListObjectsRequest, ListVersionsRequest, ObjectBackend,
    ObjectRef, ObjectVersion, RemoteOp, UploadPartCopyRequest,
};
use crate::vfs::config::MAX_DELETE_BATCH;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::fs::ObjectFs;
use crate::vfs::gateway::translate;
use crate::vfs::path;
use crate::vfs::xattr::BUCKET_ACLS;
use bytes::Bytes;
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

impl<B: ObjectBackend> ObjectFs<B> {
    /// Creates an empty object. Without `truncate`, an existing object is an
    /// error rather than being emptied.
    pub async fn touch(&self, path: &str, truncate: bool) -> VfsResult<()> {
        let p = self.resolve(path);
        if p.key.is_empty() {
            return Err(VfsError::invalid(format!("{path} is not an object path")));
        }
        if p.version_id.is_some() {
            return Err(VfsError::invalid("cannot touch an explicit version"));
        }
        if !truncate && self.exists(path).await? {
            return Err(VfsError::invalid(format!(
                "{path} exists and truncate is not set"
            )));
        }
        let opts = self.write_options(None);
        self.put_bytes(&p.bucket, &p.key, Bytes::new(), &opts).await?;
        self.invalidate_for_new_object(&p.full());
        Ok(())
    }

    /// Creates a bucket. Paths below an existing bucket need nothing; paths
    /// below a missing bucket only create it with `create_parents`.
    pub async fn mkdir(
        &self,
        path: &str,
        acl: Option<&str>,
        create_parents: bool,
        region: Option<&str>,
    ) -> VfsResult<()> {
        let p = self.resolve(path);
        if p.is_root() {
            return Err(VfsError::invalid("cannot create the root"));
        }
        if self.exists(&p.bucket).await? {
            if p.key.is_empty() {
                return Err(VfsError::AlreadyExists { path: p.bucket });
            }
            return Ok(());
        }
        if !p.key.is_empty() && !create_parents {
            self.ls(&p.bucket, false).await?;
            return Ok(());
        }
        if let Some(acl) = acl {
            if !BUCKET_ACLS.contains(&acl) {
                return Err(VfsError::invalid(format!("ACL {acl} not in {BUCKET_ACLS:?}")));
            }
        }
        let region = region.or(self.config().region.as_deref());
        self.call(RemoteOp::CreateBucket, &p.bucket, || {
            self.backend().create_bucket(&p.bucket, acl, region)
        })
        .await?;
        info!(bucket = %p.bucket, ?region, "created bucket");
        self.invalidate_cache(Some(""));
        self.invalidate_cache(Some(&p.bucket));
        Ok(())
    }

    pub async fn makedirs(&self, path: &str, exist_ok: bool) -> VfsResult<()> {
        match self.mkdir(path, None, true, None).await {
            Err(VfsError::AlreadyExists { .. }) if exist_ok => Ok(()),
            other => other,
        }
    }

    /// Removes an empty bucket, or the placeholder object of an empty pseudo
    /// directory.
    pub async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let p = self.resolve(path);
        if p.is_root() {
            return Err(VfsError::invalid("cannot remove the root"));
        }
        if p.key.is_empty() {
            self.call(RemoteOp::DeleteBucket, &p.bucket, || {
                self.backend().delete_bucket(&p.bucket)
            })
            .await?;
            info!(bucket = %p.bucket, "removed bucket");
            self.invalidate_cache(Some(&p.bucket));
            self.invalidate_cache(Some(""));
            return Ok(());
        }

        let placeholder = format!("{}/", p.key.trim_end_matches('/'));
        let req = ListObjectsRequest::new(&p.bucket, &placeholder).max_keys(2);
        let page = self.list_page(&req).await?;
        if page.is_empty() {
            return Err(VfsError::not_found(path));
        }
        if page.objects.iter().any(|o| o.key != placeholder) || !page.common_prefixes.is_empty() {
            return Err(VfsError::Conflict {
                path: p.full(),
                reason: "directory not empty".to_string(),
            });
        }
        let target = p.full();
        self.call(RemoteOp::DeleteObject, &target, || {
            self.backend().delete_object(&p.bucket, &placeholder, None)
        })
        .await?;
        self.invalidate_cache(Some(&target));
        Ok(())
    }

    /// Deletes up to 1000 objects of one bucket in a single request.
    pub async fn bulk_delete<S: AsRef<str>>(&self, paths: &[S]) -> VfsResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        if paths.len() > MAX_DELETE_BATCH {
            return Err(VfsError::invalid(format!(
                "bulk delete takes at most {MAX_DELETE_BATCH} keys, got {}",
                paths.len()
            )));
        }
        let resolved: Vec<_> = paths.iter().map(|p| self.resolve(p.as_ref())).collect();
        let buckets: BTreeSet<&str> = resolved.iter().map(|p| p.bucket.as_str()).collect();
        let bucket = match buckets.into_iter().collect::<Vec<_>>()[..] {
            [only] => only.to_string(),
            _ => return Err(VfsError::invalid("bulk delete must use a single bucket")),
        };
        let keys: Vec<DeleteKey> = resolved
            .iter()
            .filter(|p| !p.key.is_empty())
            .map(|p| DeleteKey {
                key: p.key.clone(),
                version_id: p.version_id.clone(),
            })
            .collect();
        if keys.is_empty() {
            return Err(VfsError::invalid("bulk delete needs object paths"));
        }
        self.delete_keys(&bucket, &keys).await
    }

    /// One quiet `delete_objects` call with keys passed through verbatim, so
    /// `dir/` placeholder keys keep their trailing slash.
    async fn delete_keys(&self, bucket: &str, keys: &[DeleteKey]) -> VfsResult<()> {
        debug!(bucket = %bucket, keys = keys.len(), "bulk delete");
        let failures = self
            .call(RemoteOp::DeleteObjects, bucket, || {
                self.backend().delete_objects(bucket, keys)
            })
            .await?;
        for k in keys {
            let name = path::join(bucket, k.key.trim_end_matches('/'));
            self.invalidate_cache(Some(&path::parent(&name)));
        }
        if let Some(first) = failures.first() {
            for f in &failures {
                warn!(bucket = %bucket, key = %f.key, code = %f.code, "delete failed: {}", f.message);
            }
            let err = BackendError::Service {
                code: first.code.clone(),
                message: first.message.clone(),
                status: None,
            };
            return Err(translate(
                RemoteOp::DeleteObjects,
                &path::join(bucket, &first.key),
                err,
            ));
        }
        Ok(())
    }

    /// Deletes a single object.
    pub async fn rm_file(&self, path: &str) -> VfsResult<()> {
        let p = self.resolve(path);
        if p.key.is_empty() {
            return Err(VfsError::invalid(format!("{path} is not an object path")));
        }
        let target = p.full();
        self.call(RemoteOp::DeleteObject, &target, || {
            self.backend()
                .delete_object(&p.bucket, &p.key, p.version_id.as_deref())
        })
        .await?;
        self.invalidate_cache(Some(&target));
        Ok(())
    }

    /// Removes files, directory trees and buckets.
    ///
    /// With `recursive`, a versioned bucket is purged of every version and
    /// delete marker first so that it can be removed.
    pub async fn rm<S: AsRef<str>>(
        &self,
        paths: &[S],
        recursive: bool,
        maxdepth: Option<usize>,
    ) -> VfsResult<()> {
        if recursive {
            for raw in paths {
                let p = self.resolve(raw.as_ref());
                if !p.is_root() && p.key.is_empty() && self.is_bucket_versioned(&p.bucket).await? {
                    self.purge_versions(&p.bucket).await?;
                }
            }
        }
        let expanded = self.expand_path(paths, recursive, maxdepth).await?;

        let mut by_bucket: BTreeMap<String, BTreeSet<(String, Option<String>)>> = BTreeMap::new();
        let mut buckets = Vec::new();
        for name in &expanded {
            let p = self.resolve(name);
            if p.key.is_empty() {
                buckets.push(p.bucket);
                continue;
            }
            let below = format!("{}/", name.trim_end_matches('/'));
            // expanded is sorted, so children directly follow `below`
            let next = expanded.partition_point(|other| other.as_str() < below.as_str());
            let is_dir = name.ends_with('/')
                || expanded.get(next).is_some_and(|other| other.starts_with(&below));
            // a directory only exists as its `key/` placeholder, if at all
            let key = if is_dir {
                format!("{}/", p.key.trim_end_matches('/'))
            } else {
                p.key
            };
            by_bucket
                .entry(p.bucket)
                .or_default()
                .insert((key, p.version_id));
        }

        let batches: Vec<(String, Vec<DeleteKey>)> = by_bucket
            .into_iter()
            .flat_map(|(bucket, keys)| {
                let keys: Vec<DeleteKey> = keys
                    .into_iter()
                    .map(|(key, version_id)| DeleteKey { key, version_id })
                    .collect();
                keys.chunks(MAX_DELETE_BATCH)
                    .map(|batch| (bucket.clone(), batch.to_vec()))
                    .collect::<Vec<_>>()
            })
            .collect();
        try_join_all(
            batches
                .iter()
                .map(|(bucket, keys)| self.delete_keys(bucket, keys)),
        )
        .await?;

        for bucket in &buckets {
            self.rmdir(bucket).await?;
        }
        for name in &expanded {
            self.invalidate_cache(Some(name));
            self.invalidate_cache(Some(&path::parent(name)));
        }
        Ok(())
    }

    async fn purge_versions(&self, bucket: &str) -> VfsResult<()> {
        let mut req = ListVersionsRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };
        loop {
            let page = self
                .call(RemoteOp::ListObjectVersions, bucket, || {
                    self.backend().list_object_versions(&req)
                })
                .await?;
            let keys: Vec<DeleteKey> = page
                .versions
                .iter()
                .chain(&page.delete_markers)
                .map(|v| DeleteKey {
                    key: v.key.clone(),
                    version_id: Some(v.version_id.clone()),
                })
                .collect();
            debug!(bucket, keys = keys.len(), "purging object versions");
            for batch in keys.chunks(MAX_DELETE_BATCH) {
                self.call(RemoteOp::DeleteObjects, bucket, || {
                    self.backend().delete_objects(bucket, batch)
                })
                .await?;
            }
            if !page.is_truncated {
                break;
            }
            req.key_marker = page.next_key_marker;
            req.version_id_marker = page.next_version_id_marker;
        }
        self.invalidate_cache(Some(bucket));
        Ok(())
    }

    /// Assembles `path` server side from existing objects, in order. Every
    /// source but the last must be at least 5 MiB.
    pub async fn merge<S: AsRef<str>>(&self, path: &str, sources: &[S]) -> VfsResult<()> {
        let p = self.resolve(path);
        if p.key.is_empty() {
            return Err(VfsError::invalid(format!("{path} is not an object path")));
        }
        if p.version_id.is_some() {
            return Err(VfsError::invalid("cannot merge into an explicit version"));
        }
        if sources.is_empty() {
            return Err(VfsError::invalid("merge needs at least one source"));
        }
        let target = p.full();
        let opts = self.write_options(None);
        let upload_id = self
            .call(RemoteOp::CreateMultipartUpload, &target, || {
                self.backend()
                    .create_multipart_upload(&p.bucket, &p.key, &opts)
            })
            .await?;

        let copies = sources.iter().enumerate().map(|(i, src)| {
            let s = self.resolve(src.as_ref());
            let req = UploadPartCopyRequest {
                source: ObjectRef::new(&s.bucket, &s.key).with_version(s.version_id),
                bucket: p.bucket.clone(),
                key: p.key.clone(),
                upload_id: upload_id.clone(),
                part_number: i as i32 + 1,
                range: None,
            };
            let target = target.as_str();
            async move {
                let etag = self
                    .call(RemoteOp::UploadPartCopy, target, || {
                        self.backend().upload_part_copy(&req)
                    })
                    .await?;
                Ok::<_, VfsError>(CompletedPart {
                    part_number: req.part_number,
                    etag,
                })
            }
        });
        let parts = try_join_all(copies).await?;

        self.call(RemoteOp::CompleteMultipartUpload, &target, || {
            self.backend()
                .complete_multipart_upload(&p.bucket, &p.key, &upload_id, &parts)
        })
        .await?;
        self.invalidate_for_new_object(&target);
        Ok(())
    }

    /// Aborts every pending multipart upload in `bucket`; returns how many.
    pub async fn clear_multipart_uploads(&self, bucket: &str) -> VfsResult<usize> {
        let bucket = path::normalize(bucket);
        let uploads = self
            .call(RemoteOp::ListMultipartUploads, &bucket, || {
                self.backend().list_multipart_uploads(&bucket, None)
            })
            .await?;
        let aborts = uploads.iter().map(|u| {
            let target = path::join(&bucket, &u.key);
            let bucket = bucket.as_str();
            async move {
                self.call(RemoteOp::AbortMultipartUpload, &target, || {
                    self.backend()
                        .abort_multipart_upload(bucket, &u.key, &u.upload_id)
                })
                .await
            }
        });
        try_join_all(aborts).await?;
        if !uploads.is_empty() {
            info!(bucket = %bucket, count = uploads.len(), "cleared multipart uploads");
        }
        Ok(uploads.len())
    }

    pub async fn is_bucket_versioned(&self, bucket: &str) -> VfsResult<bool> {
        let bucket = self.resolve(bucket).bucket;
        let status = self
            .call(RemoteOp::GetBucketVersioning, &bucket, || {
                self.backend().get_bucket_versioning(&bucket)
            })
            .await?;
        Ok(status.as_deref() == Some("Enabled"))
    }

    /// All stored versions of the object at `path`, newest first.
    pub async fn object_version_info(&self, path: &str) -> VfsResult<Vec<ObjectVersion>> {
        if !self.config().version_aware {
            return Err(VfsError::invalid(
                "version specific functionality is disabled for a non version-aware filesystem",
            ));
        }
        let p = self.resolve(path);
        let target = p.full();
        let mut req = ListVersionsRequest {
            bucket: p.bucket.clone(),
            prefix: p.key.clone(),
            ..Default::default()
        };
        let mut versions = Vec::new();
        loop {
            let page = self
                .call(RemoteOp::ListObjectVersions, &target, || {
                    self.backend().list_object_versions(&req)
                })
                .await?;
            versions.extend(page.versions.into_iter().filter(|v| v.key == p.key));
            if !page.is_truncated {
                break;
            }
            req.key_marker = page.next_key_marker;
            req.version_id_marker = page.next_version_id_marker;
        }
        Ok(versions)
    }
}

//! Object attributes: user metadata, tags, ACLs and presigned URLs.

use crate::cadapter::client::{CopyObjectRequest, ObjectBackend, ObjectRef, RemoteOp};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::fs::ObjectFs;
use crate::vfs::path::{self, ObjectPath};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Canned ACLs accepted for objects.
pub const KEY_ACLS: [&str; 7] = [
    "private",
    "public-read",
    "public-read-write",
    "authenticated-read",
    "aws-exec-read",
    "bucket-owner-read",
    "bucket-owner-full-control",
];

/// Canned ACLs accepted for buckets.
pub const BUCKET_ACLS: [&str; 4] = [
    "private",
    "public-read",
    "public-read-write",
    "authenticated-read",
];

pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(3600);
pub const DEFAULT_SIGN_EXPIRY: Duration = Duration::from_secs(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagMode {
    /// Replace the whole tag set.
    #[default]
    Overwrite,
    /// Add to the existing tags, replacing values of equal keys.
    Merge,
}

/// Metadata keys are stored with dashes; `content_type` and `content-type`
/// name the same field.
fn meta_key(name: &str) -> String {
    name.replace('_', "-")
}

fn meta_cache_key(p: &ObjectPath) -> String {
    match &p.version_id {
        Some(v) => format!("{}?versionId={v}", p.full()),
        None => p.full(),
    }
}

impl<B: ObjectBackend> ObjectFs<B> {
    fn object_path(&self, path: &str) -> VfsResult<ObjectPath> {
        let p = self.resolve(path);
        if p.key.is_empty() {
            return Err(VfsError::invalid(format!("{path} is not an object path")));
        }
        Ok(p)
    }

    /// User metadata of an object, served from the metadata cache unless
    /// `refresh`.
    pub async fn metadata(&self, path: &str, refresh: bool) -> VfsResult<HashMap<String, String>> {
        let p = self.object_path(path)?;
        let cache_key = meta_cache_key(&p);
        if !refresh {
            if let Some(cached) = self.meta_cache.get(&cache_key).await {
                return Ok(cached);
            }
        }
        let head = self.head(&p, p.version_id.as_deref(), None).await?;
        let meta: HashMap<String, String> = head
            .metadata
            .into_iter()
            .map(|(k, v)| (meta_key(&k), v))
            .collect();
        self.meta_cache.insert(cache_key, meta.clone()).await;
        Ok(meta)
    }

    pub async fn getxattr(&self, path: &str, name: &str) -> VfsResult<Option<String>> {
        Ok(self.metadata(path, false).await?.remove(&meta_key(name)))
    }

    /// Applies `updates` to the user metadata (`None` removes a key) by
    /// copying the object onto itself. Returns the new metadata.
    pub async fn setxattr(
        &self,
        path: &str,
        updates: &HashMap<String, Option<String>>,
        content_type: Option<&str>,
    ) -> VfsResult<HashMap<String, String>> {
        let p = self.object_path(path)?;
        if p.version_id.is_some() {
            return Err(VfsError::invalid("cannot update metadata of an explicit version"));
        }
        let head = self.head(&p, None, None).await?;
        let mut meta: HashMap<String, String> = head
            .metadata
            .into_iter()
            .map(|(k, v)| (meta_key(&k), v))
            .collect();
        for (name, value) in updates {
            match value {
                Some(v) => meta.insert(meta_key(name), v.clone()),
                None => meta.remove(&meta_key(name)),
            };
        }

        let mut req = CopyObjectRequest::new(ObjectRef::new(&p.bucket, &p.key), &p.bucket, &p.key);
        req.metadata = Some(meta.clone());
        req.content_type = content_type.map(str::to_string).or(head.content_type);
        req.acl = self.config().default_acl.clone();
        let target = p.full();
        debug!(path = %target, keys = meta.len(), "replacing metadata");
        self.call(RemoteOp::CopyObject, &target, || {
            self.backend().copy_object(&req)
        })
        .await?;
        self.meta_cache.insert(meta_cache_key(&p), meta.clone()).await;
        self.invalidate_cache(Some(&target));
        Ok(meta)
    }

    pub async fn get_tags(&self, path: &str) -> VfsResult<HashMap<String, String>> {
        let p = self.object_path(path)?;
        let target = p.full();
        self.call(RemoteOp::GetObjectTagging, &target, || {
            self.backend()
                .get_object_tagging(&p.bucket, &p.key, p.version_id.as_deref())
        })
        .await
    }

    pub async fn put_tags(
        &self,
        path: &str,
        tags: HashMap<String, String>,
        mode: TagMode,
    ) -> VfsResult<()> {
        let p = self.object_path(path)?;
        let tags = match mode {
            TagMode::Overwrite => tags,
            TagMode::Merge => {
                let mut existing = self.get_tags(path).await?;
                existing.extend(tags);
                existing
            }
        };
        let target = p.full();
        self.call(RemoteOp::PutObjectTagging, &target, || {
            self.backend()
                .put_object_tagging(&p.bucket, &p.key, p.version_id.as_deref(), &tags)
        })
        .await?;
        self.invalidate_cache(Some(&target));
        Ok(())
    }

    /// Sets a canned ACL on a bucket or an object.
    pub async fn chmod(&self, path: &str, acl: &str) -> VfsResult<()> {
        let p = self.resolve(path);
        if p.is_root() {
            return Err(VfsError::invalid("cannot set an ACL on the root"));
        }
        if p.key.is_empty() {
            if !BUCKET_ACLS.contains(&acl) {
                return Err(VfsError::invalid(format!("ACL {acl} not in {BUCKET_ACLS:?}")));
            }
            self.call(RemoteOp::PutBucketAcl, &p.bucket, || {
                self.backend().put_bucket_acl(&p.bucket, acl)
            })
            .await?;
            self.invalidate_cache(Some(&p.bucket));
            return Ok(());
        }
        if !KEY_ACLS.contains(&acl) {
            return Err(VfsError::invalid(format!("ACL {acl} not in {KEY_ACLS:?}")));
        }
        let target = p.full();
        self.call(RemoteOp::PutObjectAcl, &target, || {
            self.backend()
                .put_object_acl(&p.bucket, &p.key, p.version_id.as_deref(), acl)
        })
        .await?;
        self.invalidate_cache(Some(&target));
        Ok(())
    }

    /// Presigned GET URL, valid for `expires` (one hour by default).
    pub async fn url(&self, path: &str, expires: Option<Duration>) -> VfsResult<String> {
        let p = self.object_path(path)?;
        self.presign(&p, expires.unwrap_or(DEFAULT_URL_EXPIRY)).await
    }

    /// Short-lived presigned GET URL (100 seconds by default).
    pub async fn sign(&self, path: &str, expiration: Option<Duration>) -> VfsResult<String> {
        let p = self.object_path(path)?;
        self.presign(&p, expiration.unwrap_or(DEFAULT_SIGN_EXPIRY)).await
    }

    async fn presign(&self, p: &ObjectPath, expires: Duration) -> VfsResult<String> {
        let target = path::join(&p.bucket, &p.key);
        self.call(RemoteOp::PresignGetObject, &target, || {
            self.backend()
                .presign_get_object(&p.bucket, &p.key, p.version_id.as_deref(), expires)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::MemoryBackend;
    use crate::vfs::config::FsConfig;

    fn fs() -> ObjectFs<MemoryBackend> {
        let backend = MemoryBackend::new();
        backend.insert_object("bkt", "f", b"content".to_vec());
        ObjectFs::new(backend, FsConfig::default())
    }

    #[tokio::test]
    async fn test_setxattr_and_getxattr() {
        let fs = fs();
        assert!(fs.metadata("bkt/f", false).await.unwrap().is_empty());

        let updates = HashMap::from([
            ("owner_team".to_string(), Some("storage".to_string())),
            ("stage".to_string(), Some("raw".to_string())),
        ]);
        let meta = fs.setxattr("bkt/f", &updates, Some("text/plain")).await.unwrap();
        assert_eq!(meta.get("owner-team").map(String::as_str), Some("storage"));
        assert_eq!(fs.getxattr("bkt/f", "owner_team").await.unwrap().as_deref(), Some("storage"));

        let head = fs.backend().head_object("bkt", "f", None, None).await.unwrap();
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(head.metadata.get("stage").map(String::as_str), Some("raw"));

        let removal = HashMap::from([("stage".to_string(), None)]);
        fs.setxattr("bkt/f", &removal, None).await.unwrap();
        assert_eq!(fs.getxattr("bkt/f", "stage").await.unwrap(), None);
        assert_eq!(
            fs.metadata("bkt/f", true).await.unwrap().get("owner-team").map(String::as_str),
            Some("storage")
        );
        assert_eq!(&fs.backend().object_data("bkt", "f").unwrap()[..], b"content");
    }

    #[tokio::test]
    async fn test_metadata_is_cached() {
        let fs = fs();
        fs.metadata("bkt/f", false).await.unwrap();
        fs.metadata("bkt/f", false).await.unwrap();
        assert_eq!(fs.backend().count(RemoteOp::HeadObject), 1);
        fs.metadata("bkt/f", true).await.unwrap();
        assert_eq!(fs.backend().count(RemoteOp::HeadObject), 2);
    }

    #[tokio::test]
    async fn test_tags_overwrite_and_merge() {
        let fs = fs();
        let tags = |pairs: &[(&str, &str)]| -> HashMap<String, String> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };
        fs.put_tags("bkt/f", tags(&[("a", "1")]), TagMode::Overwrite).await.unwrap();
        fs.put_tags("bkt/f", tags(&[("b", "2")]), TagMode::Merge).await.unwrap();
        assert_eq!(fs.get_tags("bkt/f").await.unwrap(), tags(&[("a", "1"), ("b", "2")]));
        fs.put_tags("bkt/f", tags(&[("c", "3")]), TagMode::Overwrite).await.unwrap();
        assert_eq!(fs.get_tags("bkt/f").await.unwrap(), tags(&[("c", "3")]));
    }

    #[tokio::test]
    async fn test_chmod_validates_acl_sets() {
        let fs = fs();
        fs.chmod("bkt/f", "bucket-owner-read").await.unwrap();
        assert_eq!(fs.backend().object_acl("bkt", "f").as_deref(), Some("bucket-owner-read"));
        fs.chmod("bkt", "authenticated-read").await.unwrap();
        assert_eq!(fs.backend().bucket_acl("bkt").as_deref(), Some("authenticated-read"));

        fs.backend().reset_calls();
        assert!(fs.chmod("bkt", "bucket-owner-read").await.is_err());
        assert!(fs.chmod("bkt/f", "everyone").await.is_err());
        assert_eq!(fs.backend().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_tag_and_acl_changes_invalidate_listings() {
        let fs = fs();
        fs.ls("bkt", false).await.unwrap();
        assert!(fs.dircache().get("bkt").is_some());
        fs.chmod("bkt/f", "private").await.unwrap();
        assert!(fs.dircache().get("bkt").is_none());

        fs.ls("bkt", false).await.unwrap();
        let tags = HashMap::from([("k".to_string(), "v".to_string())]);
        fs.put_tags("bkt/f", tags, TagMode::Overwrite).await.unwrap();
        assert!(fs.dircache().get("bkt").is_none());
    }

    #[tokio::test]
    async fn test_presigned_urls() {
        let fs = fs();
        let url = fs.url("bkt/f", None).await.unwrap();
        assert!(url.contains("X-Amz-Expires=3600"), "{url}");
        let signed = fs.sign("bkt/f", None).await.unwrap();
        assert!(signed.contains("X-Amz-Expires=100"), "{signed}");
        let custom = fs.url("bkt/f", Some(Duration::from_secs(60))).await.unwrap();
        assert!(custom.contains("X-Amz-Expires=60"));
        assert!(fs.url("bkt", None).await.is_err());
    }
}

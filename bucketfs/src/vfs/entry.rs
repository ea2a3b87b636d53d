use crate::cadapter::client::{BucketSummary, HeadObjectOutput, ObjectSummary};
use chrono::{DateTime, Utc};

pub const STORAGE_DIRECTORY: &str = "DIRECTORY";
pub const STORAGE_BUCKET: &str = "BUCKET";
pub const STORAGE_STANDARD: &str = "STANDARD";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Bucket,
}

/// A listing or stat result. `name` is always the full `bucket/key` path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Entry {
    pub name: String,
    pub size: u64,
    pub kind: EntryKind,
    pub storage_class: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub version_id: Option<String>,
}

impl Entry {
    /// Synthesised directory: size 0, storage class `DIRECTORY`.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            kind: EntryKind::Directory,
            storage_class: Some(STORAGE_DIRECTORY.to_string()),
            etag: None,
            last_modified: None,
            version_id: None,
        }
    }

    pub fn bucket(summary: &BucketSummary) -> Self {
        Self {
            name: summary.name.clone(),
            size: 0,
            kind: EntryKind::Bucket,
            storage_class: Some(STORAGE_BUCKET.to_string()),
            etag: None,
            last_modified: summary.created,
            version_id: None,
        }
    }

    pub fn from_summary(bucket: &str, obj: &ObjectSummary) -> Self {
        Self {
            name: format!("{bucket}/{}", obj.key),
            size: obj.size,
            kind: EntryKind::File,
            storage_class: obj.storage_class.clone(),
            etag: obj.etag.clone(),
            last_modified: obj.last_modified,
            version_id: None,
        }
    }

    pub fn from_head(name: impl Into<String>, head: &HeadObjectOutput) -> Self {
        Self {
            name: name.into(),
            size: head.size,
            kind: EntryKind::File,
            storage_class: Some(STORAGE_STANDARD.to_string()),
            etag: head.etag.clone(),
            last_modified: head.last_modified,
            version_id: head.version_id.clone(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory | EntryKind::Bucket)
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Etag without surrounding quotes.
    pub fn bare_etag(&self) -> Option<&str> {
        self.etag.as_deref().map(|e| e.trim_matches('"'))
    }

    /// Part count encoded in a multipart etag (`<hex>-<n>`).
    pub fn etag_parts(&self) -> Option<u32> {
        let (_, parts) = self.bare_etag()?.split_once('-')?;
        parts.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_parts() {
        let mut e = Entry::directory("b/d");
        assert_eq!(e.etag_parts(), None);
        e.etag = Some("\"0123abcd-3\"".into());
        assert_eq!(e.bare_etag(), Some("0123abcd-3"));
        assert_eq!(e.etag_parts(), Some(3));
        e.etag = Some("\"0123abcd\"".into());
        assert_eq!(e.etag_parts(), None);
    }

    #[test]
    fn test_directory_shape() {
        let d = Entry::directory("b/x");
        assert!(d.is_dir());
        assert_eq!(d.size, 0);
        assert_eq!(d.storage_class.as_deref(), Some(STORAGE_DIRECTORY));
    }
}

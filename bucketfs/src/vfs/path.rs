//! Path handling: `bucket/key[?versionId=..]` addresses.
//!
//! Paths are accepted with or without a `s3://` / `s3a://` scheme and with
//! any number of leading or trailing slashes. The normalised form (no scheme,
//! no surrounding slashes) is what the directory cache is keyed by and what
//! every [`Entry`](super::entry::Entry) name looks like. The root is `""`.

use super::error::{VfsError, VfsResult};

const SCHEMES: [&str; 2] = ["s3://", "s3a://"];
const VERSION_MARKER: &str = "?versionId=";

/// A resolved object address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectPath {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
}

impl ObjectPath {
    pub fn is_root(&self) -> bool {
        self.bucket.is_empty()
    }

    /// `bucket/key`, or just `bucket` for bucket paths.
    pub fn full(&self) -> String {
        join(&self.bucket, &self.key)
    }
}

fn strip_scheme(path: &str) -> &str {
    SCHEMES
        .iter()
        .find_map(|scheme| path.strip_prefix(scheme))
        .unwrap_or(path)
}

/// Cache key form of `path`.
pub fn normalize(path: &str) -> String {
    strip_scheme(path.trim()).trim_matches('/').to_string()
}

/// Splits a path into bucket, key and optional version.
///
/// The `?versionId=` suffix is only recognised when `version_aware`;
/// otherwise it stays part of the key.
pub fn resolve(path: &str, version_aware: bool) -> ObjectPath {
    let path = normalize(path);
    let Some((bucket, rest)) = path.split_once('/') else {
        return ObjectPath {
            bucket: path,
            ..Default::default()
        };
    };
    if version_aware {
        if let Some((key, version)) = rest.split_once(VERSION_MARKER) {
            return ObjectPath {
                bucket: bucket.to_string(),
                key: key.to_string(),
                version_id: (!version.is_empty()).then(|| version.to_string()),
            };
        }
    }
    ObjectPath {
        bucket: bucket.to_string(),
        key: rest.to_string(),
        version_id: None,
    }
}

/// Everything before the last `/`, or the root.
pub fn parent(path: &str) -> String {
    let path = normalize(path);
    match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

/// Chain of ancestors of `path`, nearest first, ending with the root.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = normalize(path);
    while !current.is_empty() {
        current = parent(&current);
        out.push(current.clone());
    }
    out
}

pub fn join(bucket: &str, key: &str) -> String {
    if key.is_empty() {
        bucket.to_string()
    } else {
        format!("{bucket}/{key}")
    }
}

/// Merges the version carried by a path with an explicitly requested one.
pub fn coalesce_version(
    path_version: Option<&str>,
    explicit: Option<&str>,
    version_aware: bool,
) -> VfsResult<Option<String>> {
    if explicit.is_some() && !version_aware {
        return Err(VfsError::invalid(
            "version ids require a version-aware filesystem",
        ));
    }
    match (path_version, explicit) {
        (Some(a), Some(b)) if a != b => Err(VfsError::invalid(format!(
            "conflicting version ids: {a} and {b}"
        ))),
        (Some(v), _) | (None, Some(v)) => Ok(Some(v.to_string())),
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_bucket_and_key() {
        let p = resolve("s3://bucket/dir/file.txt", false);
        assert_eq!(p.bucket, "bucket");
        assert_eq!(p.key, "dir/file.txt");
        assert_eq!(p.version_id, None);

        let p = resolve("/bucket", false);
        assert_eq!(p.bucket, "bucket");
        assert_eq!(p.key, "");

        assert!(resolve("", false).is_root());
        assert_eq!(resolve("s3a://b/k/", false).key, "k");
    }

    #[test]
    fn test_version_suffix_only_when_version_aware() {
        let p = resolve("b/k?versionId=abc", true);
        assert_eq!(p.key, "k");
        assert_eq!(p.version_id.as_deref(), Some("abc"));

        let p = resolve("b/k?versionId=abc", false);
        assert_eq!(p.key, "k?versionId=abc");
        assert_eq!(p.version_id, None);
    }

    #[test]
    fn test_parent_and_ancestors() {
        assert_eq!(parent("b/a"), "b");
        assert_eq!(parent("b"), "");
        assert_eq!(parent("s3://b/a/c/"), "b/a");
        assert_eq!(ancestors("a/b/c"), vec!["a/b", "a", ""]);
        assert!(ancestors("").is_empty());
    }

    #[test]
    fn test_coalesce_version() {
        assert_eq!(coalesce_version(Some("1"), None, true).unwrap().as_deref(), Some("1"));
        assert_eq!(coalesce_version(None, Some("2"), true).unwrap().as_deref(), Some("2"));
        assert_eq!(coalesce_version(Some("1"), Some("1"), true).unwrap().as_deref(), Some("1"));
        assert!(coalesce_version(Some("1"), Some("2"), true).is_err());
        assert!(coalesce_version(None, Some("2"), false).is_err());
        assert_eq!(coalesce_version(None, None, false).unwrap(), None);
    }
}

//! Listing engine: ls, recursive find, walk, glob and path expansion.

use super::entry::Entry;
use super::error::{VfsError, VfsResult};
use super::fs::ObjectFs;
use super::path::{self, normalize, parent};
use crate::cadapter::client::{ListObjectsRequest, ObjectBackend, RemoteOp};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Options for [`ObjectFs::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Levels to descend; `None` lists everything below the path in one pass.
    pub maxdepth: Option<usize>,
    /// Include synthesised directory entries.
    pub withdirs: bool,
    /// Only keys starting with `<path>/<prefix>`.
    pub prefix: String,
}

impl FindOptions {
    pub fn maxdepth(self, maxdepth: usize) -> Self {
        Self {
            maxdepth: Some(maxdepth),
            ..self
        }
    }

    pub fn withdirs(self, withdirs: bool) -> Self {
        Self { withdirs, ..self }
    }

    pub fn prefix(self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..self
        }
    }
}

/// One level yielded by [`ObjectFs::walk`]. Names are relative to `root`;
/// a file named `""` is `root` itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkLevel {
    pub root: String,
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

struct DetailedLevel {
    root: String,
    dirs: Vec<Entry>,
    files: Vec<Entry>,
}

pub fn has_magic(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// Translates a glob pattern into an anchored regex: `*` stays within one
/// path segment, `**` crosses segments, `?` is one character, `[...]` a class.
pub fn glob_to_regex(pattern: &str) -> VfsResult<Regex> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut re = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                if chars.get(i) == Some(&'/') {
                    i += 1;
                    re.push_str("(?:.*/)?");
                } else {
                    re.push_str(".*");
                }
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(len) => {
                    let class: String = chars[i + 1..i + 1 + len].iter().collect();
                    re.push('[');
                    let body = match class.strip_prefix('!') {
                        Some(rest) => {
                            re.push('^');
                            rest.to_string()
                        }
                        None => class,
                    };
                    re.push_str(&body.replace('\\', "\\\\"));
                    re.push(']');
                    i += len + 2;
                    continue;
                }
                None => re.push_str("\\["),
            },
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push('$');
    Regex::new(&re).map_err(|e| VfsError::invalid(format!("bad glob pattern {pattern}: {e}")))
}

impl<B: ObjectBackend> ObjectFs<B> {
    /// Buckets visible to the credentials, cached under the root.
    pub async fn lsbuckets(&self, refresh: bool) -> VfsResult<Vec<Entry>> {
        if !refresh {
            if let Some(cached) = self.dircache().get("") {
                return Ok(cached);
            }
        }
        if self.config().anonymous {
            return Ok(Vec::new());
        }
        let listed = self
            .call(RemoteOp::ListBuckets, "", || self.backend().list_buckets())
            .await;
        let buckets = match listed {
            Ok(buckets) => buckets,
            Err(e) => {
                warn!("cannot list buckets: {e}");
                return Ok(Vec::new());
            }
        };
        let entries: Vec<Entry> = buckets.iter().map(Entry::bucket).collect();
        self.dircache().insert("", entries.clone());
        Ok(entries)
    }

    /// Lists a directory or bucket; the root lists buckets. A file path yields
    /// its own entry.
    pub async fn ls(&self, path: &str, refresh: bool) -> VfsResult<Vec<Entry>> {
        let path = normalize(path);
        if path.is_empty() {
            return self.lsbuckets(refresh).await;
        }
        let files = self.lsdir(&path, refresh, "/", "").await?;
        if !files.is_empty() || !path.contains('/') {
            return Ok(files);
        }
        let siblings = self.lsdir(&parent(&path), refresh, "/", "").await?;
        Ok(siblings
            .into_iter()
            .filter(|e| e.name == path && !e.is_dir())
            .collect())
    }

    /// Sorted names of [`ls`](Self::ls).
    pub async fn ls_names(&self, path: &str, refresh: bool) -> VfsResult<Vec<String>> {
        let mut names: Vec<String> = self
            .ls(path, refresh)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Raw paginated listing below `path`. An empty `delimiter` lists
    /// recursively and bypasses the cache.
    pub async fn lsdir(
        &self,
        path: &str,
        refresh: bool,
        delimiter: &str,
        prefix: &str,
    ) -> VfsResult<Vec<Entry>> {
        let p = self.resolve(path);
        let path = p.full();
        let cacheable = !delimiter.is_empty() && prefix.is_empty();
        if !refresh && cacheable {
            if let Some(cached) = self.dircache().get(&path) {
                return Ok(cached);
            }
        }

        let list_prefix = if p.key.is_empty() {
            prefix.to_string()
        } else {
            format!("{}/{prefix}", p.key.trim_start_matches('/'))
        };
        debug!(path = %path, prefix = %list_prefix, delimiter, "listing directory");

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let mut token = None;
        loop {
            let req = ListObjectsRequest::new(&p.bucket, &list_prefix)
                .delimiter(delimiter)
                .continuation_token(token.take());
            let page = self.list_page(&req).await?;
            files.extend(page.objects.iter().map(|o| Entry::from_summary(&p.bucket, o)));
            dirs.extend(page.common_prefixes.iter().map(|cp| {
                let name = cp.strip_suffix(delimiter).unwrap_or(cp);
                Entry::directory(path::join(&p.bucket, name))
            }));
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        files.extend(dirs);

        if cacheable && !files.is_empty() {
            self.dircache().insert(&path, files.clone());
        }
        Ok(files)
    }

    /// Everything below `path`, sorted by name.
    pub async fn find(&self, path: &str, opts: FindOptions) -> VfsResult<Vec<Entry>> {
        let path = normalize(path);
        let p = self.resolve(&path);
        if p.bucket.is_empty() {
            return Err(VfsError::invalid("cannot traverse every bucket"));
        }
        if (opts.withdirs || opts.maxdepth.is_some()) && !opts.prefix.is_empty() {
            return Err(VfsError::invalid(
                "prefix cannot be combined with withdirs or maxdepth",
            ));
        }
        if let Some(depth) = opts.maxdepth {
            return self.find_by_walking(&path, depth, opts.withdirs).await;
        }

        let mut out = self.lsdir(&path, false, "", &opts.prefix).await?;
        if out.is_empty() && !p.key.is_empty() {
            out = match self.info(&path).await {
                Ok(entry) => vec![entry],
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e),
            };
        }

        // Rebuild the directory tree implied by the flat listing.
        let mut listings: BTreeMap<String, Vec<Entry>> = BTreeMap::new();
        let mut dirs: BTreeMap<String, Entry> = BTreeMap::new();
        for obj in &out {
            let mut child = obj.clone();
            let mut par = parent(&child.name);
            while par.len() >= path.len() {
                let listing = listings.entry(par.clone()).or_default();
                let known = listing.iter().any(|e| e.name == child.name);
                if !known {
                    listing.push(child.clone());
                }
                dirs.entry(par.clone())
                    .or_insert_with(|| Entry::directory(&par));
                if known || par == path {
                    break;
                }
                child = Entry::directory(&par);
                par = parent(&par);
            }
        }
        if opts.prefix.is_empty() {
            for (dir, entries) in listings {
                self.dircache().insert_if_absent(&dir, entries);
            }
        }

        if opts.withdirs {
            out.extend(dirs.into_values());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out.dedup_by(|a, b| a.name == b.name);
        Ok(out)
    }

    /// Names of [`find`](Self::find).
    pub async fn find_names(&self, path: &str, opts: FindOptions) -> VfsResult<Vec<String>> {
        Ok(self
            .find(path, opts)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    async fn find_by_walking(
        &self,
        path: &str,
        maxdepth: usize,
        withdirs: bool,
    ) -> VfsResult<Vec<Entry>> {
        let mut out: BTreeMap<String, Entry> = BTreeMap::new();
        for level in self.walk_detailed(path, Some(maxdepth)).await? {
            if withdirs {
                out.extend(level.dirs.into_iter().map(|e| (e.name.clone(), e)));
            }
            out.extend(level.files.into_iter().map(|e| (e.name.clone(), e)));
        }
        Ok(out.into_values().collect())
    }

    /// Depth-first traversal yielding one [`WalkLevel`] per directory.
    pub async fn walk(&self, path: &str, maxdepth: Option<usize>) -> VfsResult<Vec<WalkLevel>> {
        let levels = self.walk_detailed(path, maxdepth).await?;
        let rel = |root: &str, e: &Entry| -> String {
            e.name
                .strip_prefix(root)
                .map(|rest| rest.trim_start_matches('/').to_string())
                .unwrap_or_else(|| e.name.clone())
        };
        Ok(levels
            .into_iter()
            .map(|l| WalkLevel {
                dirs: l.dirs.iter().map(|e| rel(&l.root, e)).collect(),
                files: l.files.iter().map(|e| rel(&l.root, e)).collect(),
                root: l.root,
            })
            .collect())
    }

    async fn walk_detailed(
        &self,
        path: &str,
        maxdepth: Option<usize>,
    ) -> VfsResult<Vec<DetailedLevel>> {
        if path.trim() == "*" || normalize(path).is_empty() {
            return Err(VfsError::invalid("cannot crawl every bucket"));
        }
        if maxdepth == Some(0) {
            return Err(VfsError::invalid("maxdepth must be at least 1"));
        }
        let mut levels = Vec::new();
        let mut stack = vec![(normalize(path), maxdepth)];
        while let Some((root, depth)) = stack.pop() {
            let listing = match self.ls(&root, false).await {
                Ok(listing) => listing,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e),
            };
            let (dirs, files): (Vec<Entry>, Vec<Entry>) = listing
                .into_iter()
                .partition(|e| e.is_dir() && e.name != root);

            let remaining = depth.map(|d| d - 1);
            if remaining != Some(0) {
                stack.extend(dirs.iter().rev().map(|d| (d.name.clone(), remaining)));
            }
            levels.push(DetailedLevel { root, dirs, files });
        }
        Ok(levels)
    }

    /// Paths matching a glob pattern, sorted.
    pub async fn glob(&self, pattern: &str) -> VfsResult<Vec<String>> {
        if pattern.trim_start_matches('/').starts_with('*') {
            return Err(VfsError::invalid("cannot traverse every bucket"));
        }
        let dirs_only = pattern.ends_with('/');
        let pattern = normalize(pattern);
        if !has_magic(&pattern) {
            return Ok(if self.exists(&pattern).await? {
                vec![pattern]
            } else {
                Vec::new()
            });
        }

        let magic_at = pattern.find(['*', '?', '[']).unwrap_or(pattern.len());
        let (root, rest) = match pattern[..magic_at].rfind('/') {
            Some(slash) => (&pattern[..slash], &pattern[slash + 1..]),
            None => ("", pattern.as_str()),
        };
        let depth = if pattern.contains("**") {
            None
        } else {
            Some(rest.matches('/').count() + 1)
        };
        let mut opts = FindOptions::default().withdirs(true);
        opts.maxdepth = depth;
        let candidates = self.find(root, opts).await?;

        let re = glob_to_regex(&pattern)?;
        Ok(candidates
            .into_iter()
            .filter(|e| !dirs_only || e.is_dir())
            .filter(|e| re.is_match(&e.name))
            .map(|e| e.name)
            .collect())
    }

    /// Expands globs and, when `recursive`, directories into everything below
    /// them. Fails with `NotFound` when nothing matches.
    pub async fn expand_path<S: AsRef<str>>(
        &self,
        paths: &[S],
        recursive: bool,
        maxdepth: Option<usize>,
    ) -> VfsResult<Vec<String>> {
        if maxdepth.is_some_and(|d| d < 1) {
            return Err(VfsError::invalid("maxdepth must be at least 1"));
        }
        let mut out = BTreeSet::new();
        for raw in paths {
            let p = normalize(raw.as_ref());
            if has_magic(&p) {
                let hits = self.glob(&p).await?;
                out.extend(hits.iter().cloned());
                if recursive && maxdepth.is_none_or(|d| d > 1) {
                    let depth = maxdepth.map(|d| d - 1);
                    for hit in hits {
                        self.expand_literal(&hit, recursive, depth, &mut out).await?;
                    }
                }
                continue;
            }
            self.expand_literal(&p, recursive, maxdepth, &mut out).await?;
        }
        if out.is_empty() {
            let joined: Vec<&str> = paths.iter().map(|p| p.as_ref()).collect();
            return Err(VfsError::not_found(joined.join(", ")));
        }
        Ok(out.into_iter().collect())
    }

    async fn expand_literal(
        &self,
        p: &str,
        recursive: bool,
        maxdepth: Option<usize>,
        out: &mut BTreeSet<String>,
    ) -> VfsResult<()> {
        if recursive {
            let mut opts = FindOptions::default().withdirs(true);
            opts.maxdepth = maxdepth;
            out.extend(self.find_names(p, opts).await?);
        }
        if !out.contains(p) && (!recursive || self.exists(p).await?) {
            out.insert(p.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::MemoryBackend;
    use crate::vfs::config::FsConfig;

    fn tree() -> ObjectFs<MemoryBackend> {
        let backend = MemoryBackend::new().with_page_size(2);
        backend.create_bucket_now("bkt");
        for key in ["a/1.txt", "a/2.csv", "a/b/3.txt", "a/b/c/4.txt", "top.txt"] {
            backend.insert_object("bkt", key, key.as_bytes().to_vec());
        }
        ObjectFs::new(backend, FsConfig::default())
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("bkt/a/*.txt").unwrap();
        assert!(re.is_match("bkt/a/1.txt"));
        assert!(!re.is_match("bkt/a/b/3.txt"));

        let re = glob_to_regex("bkt/**/*.txt").unwrap();
        assert!(re.is_match("bkt/a/b/3.txt"));
        assert!(re.is_match("bkt/top.txt"));

        let re = glob_to_regex("bkt/a/[12].???").unwrap();
        assert!(re.is_match("bkt/a/2.csv"));
        assert!(!re.is_match("bkt/a/3.csv"));

        let re = glob_to_regex("bkt/[!a]*").unwrap();
        assert!(re.is_match("bkt/top.txt"));
        assert!(!re.is_match("bkt/a"));
    }

    #[tokio::test]
    async fn test_ls_paginates_and_caches() {
        let fs = tree();
        let names = fs.ls_names("bkt/a", false).await.unwrap();
        assert_eq!(names, vec!["bkt/a/1.txt", "bkt/a/2.csv", "bkt/a/b"]);
        assert!(fs.dircache().contains("bkt/a"));

        let calls = fs.backend().total_calls();
        fs.ls("bkt/a", false).await.unwrap();
        assert_eq!(fs.backend().total_calls(), calls);

        // a file path lists itself
        let own = fs.ls_names("bkt/a/1.txt", false).await.unwrap();
        assert_eq!(own, vec!["bkt/a/1.txt"]);
        assert!(fs.ls("bkt/missing", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_rejects_bad_arguments_without_calls() {
        let fs = tree();
        assert!(matches!(
            fs.find("", FindOptions::default()).await,
            Err(VfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            fs.find("bkt", FindOptions::default().withdirs(true).prefix("a")).await,
            Err(VfsError::InvalidArgument(_))
        ));
        assert_eq!(fs.backend().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_find_synthesises_directories_and_fills_cache() {
        let fs = tree();
        let files = fs.find_names("bkt/a", FindOptions::default()).await.unwrap();
        assert_eq!(
            files,
            vec!["bkt/a/1.txt", "bkt/a/2.csv", "bkt/a/b/3.txt", "bkt/a/b/c/4.txt"]
        );

        let all = fs
            .find_names("bkt/a", FindOptions::default().withdirs(true))
            .await
            .unwrap();
        assert!(all.contains(&"bkt/a/b".to_string()));
        assert!(all.contains(&"bkt/a/b/c".to_string()));

        // the listings discovered by find now answer ls without remote calls
        fs.backend().reset_calls();
        let names = fs.ls_names("bkt/a/b", false).await.unwrap();
        assert_eq!(names, vec!["bkt/a/b/3.txt", "bkt/a/b/c"]);
        assert_eq!(fs.backend().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_find_with_prefix_and_depth() {
        let fs = tree();
        let hits = fs
            .find_names("bkt/a", FindOptions::default().prefix("1"))
            .await
            .unwrap();
        assert_eq!(hits, vec!["bkt/a/1.txt"]);

        let shallow = fs
            .find_names("bkt", FindOptions::default().maxdepth(2))
            .await
            .unwrap();
        assert_eq!(shallow, vec!["bkt/a/1.txt", "bkt/a/2.csv", "bkt/top.txt"]);

        // a single file finds itself
        let one = fs.find_names("bkt/top.txt", FindOptions::default()).await.unwrap();
        assert_eq!(one, vec!["bkt/top.txt"]);
    }

    #[tokio::test]
    async fn test_walk_levels() {
        let fs = tree();
        let levels = fs.walk("bkt/a", None).await.unwrap();
        let roots: Vec<&str> = levels.iter().map(|l| l.root.as_str()).collect();
        assert_eq!(roots, vec!["bkt/a", "bkt/a/b", "bkt/a/b/c"]);
        assert_eq!(levels[0].dirs, vec!["b"]);
        assert_eq!(levels[0].files, vec!["1.txt", "2.csv"]);

        assert_eq!(fs.walk("bkt/a", Some(1)).await.unwrap().len(), 1);
        assert!(fs.walk("", None).await.is_err());
        assert!(fs.walk("*", None).await.is_err());
    }

    #[tokio::test]
    async fn test_glob_and_expand_path() {
        let fs = tree();
        assert_eq!(
            fs.glob("bkt/a/*.txt").await.unwrap(),
            vec!["bkt/a/1.txt"]
        );
        assert_eq!(
            fs.glob("s3://bkt/**/*.txt").await.unwrap(),
            vec!["bkt/a/1.txt", "bkt/a/b/3.txt", "bkt/a/b/c/4.txt", "bkt/top.txt"]
        );

        let expanded = fs.expand_path(&["bkt/a/b"], true, None).await.unwrap();
        assert_eq!(
            expanded,
            vec!["bkt/a/b", "bkt/a/b/3.txt", "bkt/a/b/c", "bkt/a/b/c/4.txt"]
        );
        let plain = fs.expand_path(&["bkt/top.txt"], false, None).await.unwrap();
        assert_eq!(plain, vec!["bkt/top.txt"]);

        let err = fs.expand_path(&["bkt/zzz*"], false, None).await.unwrap_err();
        assert!(err.is_not_found());
    }
}

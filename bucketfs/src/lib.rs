//! bucketfs: a hierarchical filesystem view over S3-compatible object stores.
//!
//! ```no_run
//! use bucketfs::cadapter::memory::MemoryBackend;
//! use bucketfs::vfs::config::FsConfig;
//! use bucketfs::ObjectFs;
//!
//! # async fn demo() -> bucketfs::VfsResult<()> {
//! let fs = ObjectFs::new(MemoryBackend::new(), FsConfig::default());
//! fs.makedirs("data", true).await?;
//! fs.pipe_file("data/logs/today.txt", "hello".into(), None).await?;
//! assert_eq!(fs.ls_names("data/logs", false).await?, vec!["data/logs/today.txt"]);
//! # Ok(())
//! # }
//! ```

pub mod cadapter;
pub mod config;
pub mod vfs;

pub use cadapter::client::ObjectBackend;
pub use vfs::error::{VfsError, VfsResult};
pub use vfs::fs::ObjectFs;

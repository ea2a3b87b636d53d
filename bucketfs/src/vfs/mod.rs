//! Filesystem view over an object store.
//!
//! [`fs::ObjectFs`] is the engine: paths are `bucket/key`, directories are
//! key prefixes, and listings are cached in a shared [`cache::DirCache`]
//! that every mutation invalidates. Operations are spread over the modules
//! below by concern; they are all inherent methods of `ObjectFs`.

pub mod blocking;
pub mod cache;
pub mod config;
pub mod copy;
pub mod entry;
pub mod error;
pub mod fs;
pub mod gateway;
pub mod io;
pub mod listing;
pub mod mutate;
pub mod path;
pub mod transfer;
pub mod xattr;

//! Object store adapter (cAdapter)
//!
//! Submodules:
//! - `client`: the `ObjectBackend` trait and its request/response types
//! - `s3`: S3-compatible adapter on aws-sdk-s3
//! - `memory`: in-process store for tests and the `--memory` CLI mode
//! - `region`: per-bucket client cache used by the S3 adapter
//!
//! Adapters issue exactly one request per call. Retries, backoff and error
//! classification happen in `vfs::gateway`.
pub mod client;
pub mod memory;
pub mod region;
pub mod s3;

//! Remote call gateway.
//!
//! Every backend call made by the filesystem goes through [`Gateway::call`]:
//! transient failures (timeouts) are retried with exponential backoff, and the
//! final error is translated into the [`VfsError`] taxonomy exactly once.

use super::error::{VfsError, VfsResult};
use crate::cadapter::client::{BackendError, BackendResult, RemoteOp};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const BACKOFF_FACTOR: f64 = 1.7;
const MAX_DELAY: Duration = Duration::from_secs(15);
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: usize) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn base_delay(self, base_delay: Duration) -> Self {
        Self { base_delay, ..self }
    }

    /// Pause after the failed attempt `attempt` (0-based): `base * 1.7^attempt`, capped at 15 s.
    pub fn delay(&self, attempt: usize) -> Duration {
        let factor = BACKOFF_FACTOR.powi(attempt.min(64) as i32);
        let nanos = self.base_delay.as_nanos() as f64 * factor;
        Duration::from_nanos(nanos as u64).min(MAX_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_RETRIES)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gateway {
    policy: RetryPolicy,
}

impl Gateway {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `f` until it succeeds, fails permanently, or the attempts run out.
    pub async fn call<T, F, Fut>(&self, op: RemoteOp, target: &str, mut f: F) -> VfsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let mut attempt = 0;
        loop {
            debug!(op = op.as_str(), target, attempt, "remote call");
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < self.policy.attempts => {
                    let delay = self.policy.delay(attempt);
                    debug!(op = op.as_str(), target, ?delay, "transient failure, retrying: {e}");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(op = op.as_str(), target, attempts = attempt + 1, "giving up: {e}");
                        return Err(VfsError::Remote {
                            op,
                            target: target.to_string(),
                            source: e,
                        });
                    }
                    return Err(translate(op, target, e));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    Conflict,
    PreconditionFailed,
    InvalidArgument,
}

fn classify_code(code: &str) -> Option<Class> {
    let class = match code {
        "NoSuchKey" | "NoSuchBucket" | "NoSuchUpload" | "NoSuchVersion" | "NotFound" | "404" => {
            Class::NotFound
        }
        "AccessDenied" | "AllAccessDisabled" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
        | "ExpiredToken" | "AccountProblem" | "InvalidSecurity" | "403" => {
            Class::PermissionDenied
        }
        "BucketAlreadyExists" | "BucketAlreadyOwnedByYou" => Class::AlreadyExists,
        "BucketNotEmpty" | "OperationAborted" | "409" => Class::Conflict,
        "PreconditionFailed" | "412" => Class::PreconditionFailed,
        "InvalidArgument" | "InvalidBucketName" | "InvalidRange" | "InvalidPart"
        | "InvalidPartOrder" | "EntityTooSmall" | "EntityTooLarge" | "MalformedXML"
        | "InvalidRequest" | "KeyTooLongError" | "MetadataTooLarge" | "InvalidDigest" => {
            Class::InvalidArgument
        }
        _ => return None,
    };
    Some(class)
}

fn classify_status(status: u16) -> Option<Class> {
    match status {
        404 => Some(Class::NotFound),
        403 => Some(Class::PermissionDenied),
        409 => Some(Class::Conflict),
        412 => Some(Class::PreconditionFailed),
        _ => None,
    }
}

/// Pulls the error code out of a response the transport could not decode:
/// a `<Code>` element in the raw body, else the HTTP status.
fn recover_code(status: Option<u16>, body: Option<&str>) -> Option<String> {
    let from_body = body
        .and_then(|b| b.split_once("<Code>"))
        .and_then(|(_, rest)| rest.split_once("</Code>"))
        .map(|(code, _)| code.trim().to_string())
        .filter(|c| !c.is_empty());
    from_body.or_else(|| status.map(|s| s.to_string()))
}

/// Maps a backend failure onto the filesystem error taxonomy.
pub fn translate(op: RemoteOp, target: &str, err: BackendError) -> VfsError {
    let class = match &err {
        BackendError::Service { code, status, .. } => {
            classify_code(code).or_else(|| status.and_then(classify_status))
        }
        BackendError::Malformed { status, body, .. } => {
            recover_code(*status, body.as_deref()).and_then(|code| classify_code(&code))
        }
        BackendError::Timeout(_) | BackendError::Other(_) => None,
    };
    let path = target.to_string();
    match class {
        Some(Class::NotFound) => VfsError::NotFound { path },
        Some(Class::PermissionDenied) => VfsError::PermissionDenied { path },
        Some(Class::AlreadyExists) => VfsError::AlreadyExists { path },
        Some(Class::Conflict) => VfsError::Conflict {
            path,
            reason: err.to_string(),
        },
        Some(Class::PreconditionFailed) => VfsError::PreconditionFailed { path },
        Some(Class::InvalidArgument) => VfsError::InvalidArgument(format!("{op} on {target}: {err}")),
        None => VfsError::Remote {
            op,
            target: path,
            source: err,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_gateway(attempts: usize) -> Gateway {
        Gateway::new(RetryPolicy::new(attempts).base_delay(Duration::from_millis(1)))
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        let second = policy.delay(1).as_millis();
        assert!((169..=170).contains(&second));
        assert!(policy.delay(3) > policy.delay(2));
        assert_eq!(policy.delay(40), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_timeouts_retried_until_success() {
        let gw = fast_gateway(5);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let out = gw
            .call(RemoteOp::HeadObject, "b/k", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BackendError::Timeout("slow".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_remote_error() {
        let gw = fast_gateway(5);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let err = gw
            .call(RemoteOp::GetObject, "b/k", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BackendError::Timeout("slow".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(err, VfsError::Remote { op: RemoteOp::GetObject, .. }));
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let gw = fast_gateway(5);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let err = gw
            .call(RemoteOp::GetObject, "b/k", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BackendError::service("AccessDenied", "no", 403))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_permission_denied());
    }

    #[test]
    fn test_translation_table() {
        let t = |code: &str, status| translate(RemoteOp::HeadObject, "b/k", BackendError::service(code, "", status));
        assert!(t("NoSuchKey", 404).is_not_found());
        assert!(t("NoSuchVersion", 404).is_not_found());
        assert!(matches!(t("BucketAlreadyOwnedByYou", 409), VfsError::AlreadyExists { .. }));
        assert!(matches!(t("BucketNotEmpty", 409), VfsError::Conflict { .. }));
        assert!(matches!(t("PreconditionFailed", 412), VfsError::PreconditionFailed { .. }));
        assert!(matches!(t("EntityTooSmall", 400), VfsError::InvalidArgument(_)));
        assert!(matches!(t("SlowDown", 503), VfsError::Remote { .. }));
        // unknown code, known status
        assert!(t("Weird", 404).is_not_found());
    }

    #[test]
    fn test_malformed_recovery() {
        let err = BackendError::Malformed {
            message: "bad xml".into(),
            status: Some(500),
            body: Some("<Error><Code>NoSuchKey</Code><Message>x</Message></Error>".into()),
        };
        assert!(translate(RemoteOp::GetObject, "b/k", err).is_not_found());

        let err = BackendError::Malformed {
            message: "bad xml".into(),
            status: Some(403),
            body: Some("garbage".into()),
        };
        assert!(translate(RemoteOp::GetObject, "b/k", err).is_permission_denied());

        let err = BackendError::Malformed {
            message: "bad xml".into(),
            status: None,
            body: None,
        };
        assert!(matches!(
            translate(RemoteOp::GetObject, "b/k", err),
            VfsError::Remote { .. }
        ));
    }
}

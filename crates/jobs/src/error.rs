// crates/jobs/src/error.rs
use thiserror::Error;

/// Misuse errors from [`crate::JobRegistry::start`].
///
/// These are programmer errors in the calling code. The registry logs them
/// loudly and returns them; it never panics the controller loop.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("job {0} started with no payload set")]
    NoPayload(crate::JobId),

    #[error("job {0} started with no start callback set")]
    NoStartCallback(crate::JobId),

    #[error("job {0} is not in the registry")]
    UnknownJob(crate::JobId),

    #[error("failed to spawn worker thread: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
}

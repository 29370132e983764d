use thiserror::Error;

/// Client-core failure taxonomy. Nothing here is fatal to the process: a
/// failed open leaves the view absent or retriable, never crashed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A snapshot or store operation failed. Recoverable by retrying the
    /// same operation; views hold a Failed phase until retried.
    #[error("transient fetch failure: {0}")]
    TransientFetch(#[source] anyhow::Error),

    /// Rejected locally before any I/O.
    #[error("validation failed: {0}")]
    Validation(&'static str),

    /// The change feed could not be established or went away.
    #[error("subscription failure: {0}")]
    Subscription(String),
}

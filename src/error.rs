use thiserror::Error;

use crate::client::StoreError;
use crate::optimistic::MutationId;

// ---------------------------------------------------------------------------
// SubscribeError
// ---------------------------------------------------------------------------

/// A subscription failed to establish. Fatal to the component activation —
/// the caller decides whether to retry; the library never degrades silently
/// to a non-realtime view.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("failed to subscribe to \"{topic}\": {source}")]
    Establish {
        topic: String,
        #[source]
        source: StoreError,
    },

    #[error("initial load for \"{topic}\" failed: {source}")]
    InitialLoad {
        topic: String,
        #[source]
        source: StoreError,
    },
}

// ---------------------------------------------------------------------------
// MergeError
// ---------------------------------------------------------------------------

/// A single change event could not be applied to the view. Isolated: the
/// event is dropped (with a log line) and the subscription continues.
#[derive(Debug, Clone, Error)]
pub enum MergeError {
    #[error("change event on \"{topic}\" carries an empty record id")]
    EmptyId { topic: String },

    #[error("change event on \"{topic}\" does not match subscription topic \"{expected}\"")]
    TopicMismatch { topic: String, expected: String },
}

// ---------------------------------------------------------------------------
// CommitError
// ---------------------------------------------------------------------------

/// A remote commit failed. The associated optimistic mutation has already
/// been rolled back by the time this error is returned.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("remote operation for {mutation_id} failed: {source}")]
    Remote {
        mutation_id: MutationId,
        #[source]
        source: StoreError,
    },

    #[error("remote operation for {mutation_id} timed out after {timeout_ms}ms")]
    Timeout {
        mutation_id: MutationId,
        timeout_ms: u64,
    },

    #[error("no pending mutation registered for {mutation_id}")]
    UnknownMutation { mutation_id: MutationId },

    #[error("a mutation is already pending for {mutation_id}")]
    AlreadyPending { mutation_id: MutationId },
}

// ---------------------------------------------------------------------------
// ViewSyncError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ViewSyncError {
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias — the default error type is `ViewSyncError`.
pub type Result<T, E = ViewSyncError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

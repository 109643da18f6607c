//! MutationCoordinator — optimistic local mutations reconciled against the
//! external store.
//!
//! The shape is always the same: snapshot the engaged record, apply the
//! transform to the shared view synchronously, issue the remote operation,
//! then either keep the local mutation (success) or restore the snapshot
//! (failure, timeout). Only the transform and the remote operation differ
//! between mutation kinds.
//!
//! # State machine
//!
//! Per [`MutationId`]: `Idle → Applied → {Committed | RolledBack}`.
//! `Applied` is the only phase holding a [`RecordSnapshot`]; the terminal
//! phases drop it. A fresh mutation on the same record starts over from
//! `Idle` (terminal entries are replaced).
//!
//! # Interleaving
//!
//! Rollback runs under the same view lock as change-event merges and
//! restores only the engaged record's occurrences, so merges applied to
//! other records between apply and rollback survive. Callers must
//! serialize mutations per record id — exactly one mutation may be in
//! flight per [`MutationId`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::client::StoreError;
use crate::error::CommitError;
use crate::projector::SharedView;
use crate::view::{LocalView, RecordSnapshot};

// ============================================================================
// MutationId
// ============================================================================

/// Identity of one optimistic mutation: the operation name plus the engaged
/// record id (e.g. `approve:5`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MutationId {
    op: String,
    record_id: String,
}

impl MutationId {
    pub fn new(op: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            record_id: record_id.into(),
        }
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn op(&self) -> &str {
        &self.op
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.op, self.record_id)
    }
}

// ============================================================================
// Phases
// ============================================================================

/// Lifecycle phase of a mutation. `Committed` and `RolledBack` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Applied,
    Committed,
    RolledBack,
}

/// Rollback bookkeeping for one in-flight mutation. The snapshot is taken
/// at apply time and consumed exactly once — by a successful commit
/// (discarded) or a rollback (restored).
struct PendingMutation {
    snapshot: Option<RecordSnapshot>,
    phase: MutationPhase,
}

// ============================================================================
// Options
// ============================================================================

/// Callback fired when a commit fails and the local mutation has been
/// rolled back — the user-visible failure notice.
pub type NoticeCallback = dyn Fn(&CommitError) + Send + Sync;

/// Configuration for [`MutationCoordinator`].
pub struct CoordinatorOptions {
    /// Upper bound on a single remote commit; expiry takes the rollback
    /// path. `None` disables the bound (a hung commit then stays `Applied`
    /// indefinitely).
    pub commit_timeout: Option<Duration>,
    /// Called after every rollback.
    pub on_notice: Option<Arc<NoticeCallback>>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            commit_timeout: Some(Duration::from_secs(30)),
            on_notice: None,
        }
    }
}

// ============================================================================
// MutationCoordinator
// ============================================================================

pub struct MutationCoordinator<V: LocalView> {
    view: SharedView<V>,
    pending: Mutex<HashMap<MutationId, PendingMutation>>,
    commit_timeout: Option<Duration>,
    on_notice: Option<Arc<NoticeCallback>>,
}

impl<V: LocalView> MutationCoordinator<V> {
    pub fn new(view: SharedView<V>, options: CoordinatorOptions) -> Self {
        Self {
            view,
            pending: Mutex::new(HashMap::new()),
            commit_timeout: options.commit_timeout,
            on_notice: options.on_notice,
        }
    }

    /// Apply `transform` to the view synchronously and register the
    /// mutation as `Applied`.
    ///
    /// The snapshot covers `record_id` only — the record the mutation
    /// engages. Returns `CommitError::AlreadyPending` (view untouched) if
    /// a mutation with this id is still in flight.
    pub fn apply_optimistic<F>(
        &self,
        mutation_id: MutationId,
        record_id: &str,
        transform: F,
    ) -> Result<(), CommitError>
    where
        F: FnOnce(&mut V),
    {
        let mut pending = self.pending.lock();
        if pending
            .get(&mutation_id)
            .is_some_and(|p| p.phase == MutationPhase::Applied)
        {
            return Err(CommitError::AlreadyPending { mutation_id });
        }

        let snapshot = {
            let mut view = self.view.lock();
            let snapshot = view.snapshot_record(record_id);
            transform(&mut view);
            snapshot
        };

        // Terminal entries for a previous mutation with the same identity
        // are replaced — a fresh mutation starts over from Idle.
        pending.insert(
            mutation_id,
            PendingMutation {
                snapshot: Some(snapshot),
                phase: MutationPhase::Applied,
            },
        );
        Ok(())
    }

    /// Invoke the remote operation for an applied mutation and reconcile.
    ///
    /// Success discards the snapshot and leaves the applied local mutation
    /// standing. Failure (including authorization failures and timeout)
    /// restores the engaged record from the snapshot, fires `on_notice`,
    /// and returns the error.
    pub async fn commit<F, Fut>(
        &self,
        mutation_id: MutationId,
        remote_op: F,
    ) -> Result<(), CommitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        // Take the snapshot out up front. A missing entry, a terminal
        // entry, or a commit already in flight all surface the same way.
        let snapshot = {
            let mut pending = self.pending.lock();
            match pending.get_mut(&mutation_id) {
                Some(entry) if entry.phase == MutationPhase::Applied => {
                    match entry.snapshot.take() {
                        Some(snapshot) => snapshot,
                        None => {
                            return Err(CommitError::UnknownMutation { mutation_id });
                        }
                    }
                }
                _ => return Err(CommitError::UnknownMutation { mutation_id }),
            }
        };

        let result = match self.commit_timeout {
            Some(limit) => match tokio::time::timeout(limit, remote_op()).await {
                Ok(result) => result.map_err(|source| CommitError::Remote {
                    mutation_id: mutation_id.clone(),
                    source,
                }),
                Err(_) => Err(CommitError::Timeout {
                    mutation_id: mutation_id.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => remote_op().await.map_err(|source| CommitError::Remote {
                mutation_id: mutation_id.clone(),
                source,
            }),
        };

        match result {
            Ok(()) => {
                self.finish(&mutation_id, MutationPhase::Committed);
                tracing::debug!(mutation = %mutation_id, "mutation committed");
                Ok(())
            }
            Err(error) => {
                {
                    let mut view = self.view.lock();
                    view.restore_record(snapshot);
                }
                self.finish(&mutation_id, MutationPhase::RolledBack);
                tracing::error!(mutation = %mutation_id, error = %error, "commit failed; local mutation rolled back");
                self.notify(&error);
                Err(error)
            }
        }
    }

    /// Current phase of a mutation, `None` if never applied.
    pub fn phase(&self, mutation_id: &MutationId) -> Option<MutationPhase> {
        self.pending.lock().get(mutation_id).map(|p| p.phase)
    }

    /// Number of mutations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending
            .lock()
            .values()
            .filter(|p| p.phase == MutationPhase::Applied)
            .count()
    }

    fn finish(&self, mutation_id: &MutationId, phase: MutationPhase) {
        if let Some(entry) = self.pending.lock().get_mut(mutation_id) {
            entry.phase = phase;
            entry.snapshot = None;
        }
    }

    fn notify(&self, error: &CommitError) {
        if let Some(callback) = &self.on_notice {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(error);
            }));
        }
    }
}

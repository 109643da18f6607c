//! ModerationQueue — an id-keyed view of pending submissions with
//! approve/reject optimistic mutations.
//!
//! Approve removes the record locally and issues an update moving it to the
//! approved status; reject removes it locally and issues a delete. Both
//! share the identical apply/commit/rollback shape — a failed remote call
//! (the store also rejects non-administrators here) restores the record and
//! surfaces a notice.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::client::{RealtimeClient, StoreRequest};
use crate::error::{CommitError, SubscribeError};
use crate::optimistic::{CoordinatorOptions, MutationCoordinator, MutationId, NoticeCallback};
use crate::projector::{shared, ChangeFeedProjector, ProjectorHandle, SharedView};
use crate::types::{EqFilter, Record, SubscriptionSpec};
use crate::view::{KeyedView, LocalView};

// ============================================================================
// Options
// ============================================================================

/// Configuration for [`ModerationQueue`].
pub struct ModerationQueueOptions {
    /// Table/stream holding the moderated submissions.
    pub topic: String,
    /// Status column (default `"status"`).
    pub status_field: String,
    /// Value marking a submission as awaiting moderation (default `"pending"`).
    pub pending_status: Value,
    /// Value an approval moves the submission to (default `"active"`).
    pub approved_status: Value,
    /// Commit bound + rollback notice hook, passed through to the
    /// coordinator.
    pub commit_timeout: Option<std::time::Duration>,
    pub on_notice: Option<Arc<NoticeCallback>>,
}

impl ModerationQueueOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        let defaults = CoordinatorOptions::default();
        Self {
            topic: topic.into(),
            status_field: "status".to_string(),
            pending_status: json!("pending"),
            approved_status: json!("active"),
            commit_timeout: defaults.commit_timeout,
            on_notice: None,
        }
    }
}

/// Pending-count snapshot for dashboard chrome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModerationStats {
    pub pending: usize,
}

// ============================================================================
// ModerationQueue
// ============================================================================

pub struct ModerationQueue {
    client: Arc<dyn RealtimeClient>,
    topic: String,
    status_field: String,
    pending_status: Value,
    approved_status: Value,
    view: SharedView<KeyedView>,
    coordinator: MutationCoordinator<KeyedView>,
    handle: Option<ProjectorHandle<KeyedView>>,
}

impl ModerationQueue {
    pub fn new(client: Arc<dyn RealtimeClient>, options: ModerationQueueOptions) -> Self {
        let view = shared(KeyedView::new());
        let coordinator = MutationCoordinator::new(
            Arc::clone(&view),
            CoordinatorOptions {
                commit_timeout: options.commit_timeout,
                on_notice: options.on_notice,
            },
        );
        Self {
            client,
            topic: options.topic,
            status_field: options.status_field,
            pending_status: options.pending_status,
            approved_status: options.approved_status,
            view,
            coordinator,
            handle: None,
        }
    }

    /// Subscribe to the pending-status change stream and seed the queue
    /// with the current pending submissions.
    pub async fn activate(&mut self) -> Result<(), SubscribeError> {
        let spec = SubscriptionSpec::filtered(
            self.topic.clone(),
            EqFilter::new(self.status_field.clone(), self.pending_status.clone()),
        );
        let projector =
            ChangeFeedProjector::new(Arc::clone(&self.client), spec, Arc::clone(&self.view));
        self.handle = Some(projector.activate_seeded().await?);
        Ok(())
    }

    /// Tear the subscription down. Idempotent.
    pub async fn deactivate(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.deactivate().await;
        }
    }

    /// Approve a submission: remove it from the queue immediately, then
    /// move it to the approved status remotely. Rolls back on failure.
    pub async fn approve(&self, id: &str) -> Result<(), CommitError> {
        let mut payload = serde_json::Map::new();
        payload.insert(self.status_field.clone(), self.approved_status.clone());
        let request = StoreRequest::update(
            self.topic.clone(),
            EqFilter::new("id", json!(id)),
            Value::Object(payload),
        );
        self.decide("approve", id, request).await
    }

    /// Reject a submission: remove it from the queue immediately, then
    /// delete it remotely. Rolls back on failure.
    pub async fn reject(&self, id: &str) -> Result<(), CommitError> {
        let request = StoreRequest::delete(self.topic.clone(), EqFilter::new("id", json!(id)));
        self.decide("reject", id, request).await
    }

    /// The shared optimistic shape of both decisions — only the remote
    /// request differs.
    async fn decide(&self, op: &str, id: &str, request: StoreRequest) -> Result<(), CommitError> {
        let mutation_id = MutationId::new(op, id);
        self.coordinator
            .apply_optimistic(mutation_id.clone(), id, |view| {
                view.remove(id);
            })?;

        let client = Arc::clone(&self.client);
        self.coordinator
            .commit(mutation_id, move || async move { client.request(request).await })
            .await
    }

    /// Current pending submissions in arrival order.
    pub fn pending(&self) -> Vec<Record> {
        self.view.lock().records().to_vec()
    }

    pub fn stats(&self) -> ModerationStats {
        ModerationStats {
            pending: self.view.lock().len(),
        }
    }

    /// The underlying shared view, for tests and custom rendering.
    pub fn view(&self) -> &SharedView<KeyedView> {
        &self.view
    }
}

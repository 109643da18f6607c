//! ChangeFeedProjector — projects a filtered change stream into a shared
//! local view.
//!
//! `activate` opens the subscription and spawns one background listener
//! task; no view mutation happens synchronously. Each received event is
//! re-checked against the subscription spec, then merged under the view
//! lock. An event that cannot be merged is dropped with a warning and the
//! stream continues — only subscription establishment is fatal.
//!
//! Teardown is structural, not conventional: [`ProjectorHandle::deactivate`]
//! clears the is-active flag while holding the view lock, so an event
//! already pulled off the channel but not yet merged can never be applied
//! after deactivation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::client::{RealtimeClient, SubscriptionId};
use crate::error::{MergeError, SubscribeError};
use crate::types::{ChangeEvent, Record, SubscriptionSpec};
use crate::view::{LocalView, MergeOutcome};

// ============================================================================
// Shared view handle
// ============================================================================

/// A view shared between the projector task, the mutation coordinator, and
/// the reading caller. The mutex serializes merges and rollbacks for one
/// component instance; it is never held across an await point.
pub type SharedView<V> = Arc<Mutex<V>>;

/// Wrap a view for sharing.
pub fn shared<V: LocalView>(view: V) -> SharedView<V> {
    Arc::new(Mutex::new(view))
}

/// Callback fired after every successful merge of an Insert into an
/// ordered view — the scroll-to-latest effect. Updates and Deletes never
/// fire it.
pub type AppendCallback = dyn Fn(&Record) + Send + Sync;

// ============================================================================
// ChangeFeedProjector
// ============================================================================

/// Builder for an active change-feed projection.
pub struct ChangeFeedProjector<V: LocalView> {
    client: Arc<dyn RealtimeClient>,
    spec: SubscriptionSpec,
    view: SharedView<V>,
    on_append: Option<Arc<AppendCallback>>,
}

impl<V: LocalView> ChangeFeedProjector<V> {
    pub fn new(client: Arc<dyn RealtimeClient>, spec: SubscriptionSpec, view: SharedView<V>) -> Self {
        Self {
            client,
            spec,
            view,
            on_append: None,
        }
    }

    /// Register the scroll-to-latest hook.
    #[must_use]
    pub fn on_append(mut self, callback: impl Fn(&Record) + Send + Sync + 'static) -> Self {
        self.on_append = Some(Arc::new(callback));
        self
    }

    /// Open the subscription and spawn the listener task.
    ///
    /// Returns `SubscribeError::Establish` if the stream cannot be opened —
    /// the component must surface this rather than degrade to a stale view.
    pub async fn activate(self) -> Result<ProjectorHandle<V>, SubscribeError> {
        self.start(false).await
    }

    /// Open the subscription, seed the view with an initial load, then
    /// spawn the listener task.
    ///
    /// Ordering matters: the subscription is opened first so no event is
    /// missed; events delivered while the load is in flight sit in the
    /// channel and are merged on top of the seed. An event already present
    /// in the load re-applies idempotently for keyed views; for ordered
    /// views it can duplicate (the documented literal Insert behavior).
    pub async fn activate_seeded(self) -> Result<ProjectorHandle<V>, SubscribeError> {
        self.start(true).await
    }

    async fn start(self, seed: bool) -> Result<ProjectorHandle<V>, SubscribeError> {
        let Self {
            client,
            spec,
            view,
            on_append,
        } = self;

        let subscription = client
            .subscribe(&spec)
            .await
            .map_err(|source| SubscribeError::Establish {
                topic: spec.topic.clone(),
                source,
            })?;

        if seed {
            match client.fetch(&spec.topic, spec.filter.as_ref()).await {
                Ok(records) => view.lock().seed(records),
                Err(source) => {
                    // Release the just-opened subscription before failing.
                    client.unsubscribe(&subscription.id).await;
                    return Err(SubscribeError::InitialLoad {
                        topic: spec.topic.clone(),
                        source,
                    });
                }
            }
        }

        let active = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(listen(
            subscription.events,
            spec,
            Arc::clone(&view),
            Arc::clone(&active),
            on_append,
            stop_rx,
        ));

        Ok(ProjectorHandle {
            client,
            subscription_id: subscription.id,
            view,
            active,
            stop_tx: Some(stop_tx),
            task: Some(task),
        })
    }
}

// ----------------------------------------------------------------------------
// Listener task
// ----------------------------------------------------------------------------

/// What to do with a received event after the filter re-check.
enum Action {
    Merge,
    Evict,
}

async fn listen<V: LocalView>(
    mut events: tokio::sync::mpsc::Receiver<ChangeEvent>,
    spec: SubscriptionSpec,
    view: SharedView<V>,
    active: Arc<AtomicBool>,
    on_append: Option<Arc<AppendCallback>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            maybe = events.recv() => match maybe {
                Some(event) => event,
                // Channel closed: the client stopped delivering.
                None => break,
            },
        };

        if let Err(e) = validate(&event, &spec) {
            tracing::warn!(topic = %spec.topic, error = %e, "dropping change event");
            continue;
        }

        // Server-side filtering is re-checked here as a guard. A non-match
        // is a silent skip for Inserts; for Updates and Deletes it evicts
        // the id instead — the record left the filtered set (e.g. a pending
        // submission another moderator approved).
        let action = if spec.accepts(&event) {
            Action::Merge
        } else {
            match &event {
                ChangeEvent::Insert { .. } => continue,
                ChangeEvent::Update { .. } | ChangeEvent::Delete { .. } => Action::Evict,
            }
        };

        let outcome = {
            let mut guard = view.lock();
            // Checked under the view lock: deactivate() flips the flag
            // while holding the same lock, so a merge can never land after
            // teardown observed it.
            if !active.load(Ordering::Relaxed) {
                break;
            }
            match action {
                Action::Merge => guard.merge(&event),
                Action::Evict => {
                    if guard.remove(event.record_id()) > 0 {
                        MergeOutcome::Removed
                    } else {
                        MergeOutcome::Ignored
                    }
                }
            }
        };

        if outcome == MergeOutcome::Appended {
            if let (Some(callback), ChangeEvent::Insert { new, .. }) = (&on_append, &event) {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback(new);
                }));
            }
        }
    }

    tracing::debug!(topic = %spec.topic, "change feed listener stopped");
}

fn validate(event: &ChangeEvent, spec: &SubscriptionSpec) -> Result<(), MergeError> {
    if event.record_id().is_empty() {
        return Err(MergeError::EmptyId {
            topic: event.topic().to_string(),
        });
    }
    if event.topic() != spec.topic {
        return Err(MergeError::TopicMismatch {
            topic: event.topic().to_string(),
            expected: spec.topic.clone(),
        });
    }
    Ok(())
}

// ============================================================================
// ProjectorHandle
// ============================================================================

/// Handle to an active projection. Deactivation is idempotent; dropping the
/// handle tears the listener down best-effort (the client-side subscription
/// is only released by an explicit `deactivate`).
pub struct ProjectorHandle<V: LocalView> {
    client: Arc<dyn RealtimeClient>,
    subscription_id: SubscriptionId,
    view: SharedView<V>,
    active: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl<V: LocalView> ProjectorHandle<V> {
    /// Tear the projection down: stop the listener, release the client-side
    /// subscription. Safe to call any number of times — calls after the
    /// first have no additional effect.
    pub async fn deactivate(&mut self) {
        let was_active = {
            let _guard = self.view.lock();
            self.active.swap(false, Ordering::SeqCst)
        };
        if !was_active {
            return;
        }

        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.client.unsubscribe(&self.subscription_id).await;
    }

    /// Whether the listener task is still running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// The view this projection feeds.
    pub fn view(&self) -> &SharedView<V> {
        &self.view
    }
}

impl<V: LocalView> Drop for ProjectorHandle<V> {
    fn drop(&mut self) {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::warn!(
                "projector handle dropped without deactivate(); signaling listener to stop"
            );
        }
        self.active.store(false, Ordering::SeqCst);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

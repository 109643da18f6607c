//! RealtimeClient — the collaborator seam to the external store.
//!
//! The store owns persistence, authentication, and conflict resolution;
//! this crate only subscribes to its change streams and issues read/write
//! requests. Implementations handle the actual wire protocol (WebSocket,
//! HTTP, in-process test double). The connection is process-wide:
//! constructed once at startup and passed by `Arc` to each component.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{ChangeEvent, EqFilter, Record, SubscriptionSpec};

// ============================================================================
// StoreError
// ============================================================================

/// Classification of store failures. An `Auth` failure is an ordinary
/// failure from this crate's point of view — it takes the same rollback
/// path as any other commit error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Retriable (network, temporary failures)
    Transient,
    /// Not retriable (validation, constraint violation, etc.)
    Permanent,
    /// Authentication/authorization failed
    Auth,
    /// Rate limit or quota exceeded
    Capacity,
}

/// Store-level error: a status/message pair from the collaborator.
/// No retry is built in at this level.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    pub kind: StoreErrorKind,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: StoreErrorKind::Transient,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: StoreErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Write operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Insert,
    Update,
    Delete,
}

/// A single write request against the store.
///
/// `predicate` selects the affected rows (equality only — matching the
/// subscription filter surface); `payload` carries the new column values
/// for Insert/Update and is `None` for Delete.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub topic: String,
    pub op: StoreOp,
    pub predicate: Option<EqFilter>,
    pub payload: Option<Value>,
}

impl StoreRequest {
    pub fn insert(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            op: StoreOp::Insert,
            predicate: None,
            payload: Some(payload),
        }
    }

    pub fn update(topic: impl Into<String>, predicate: EqFilter, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            op: StoreOp::Update,
            predicate: Some(predicate),
            payload: Some(payload),
        }
    }

    pub fn delete(topic: impl Into<String>, predicate: EqFilter) -> Self {
        Self {
            topic: topic.into(),
            op: StoreOp::Delete,
            predicate: Some(predicate),
            payload: None,
        }
    }
}

// ============================================================================
// Subscription handle
// ============================================================================

/// Opaque per-subscription identifier, assigned by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// An established subscription: the client delivers matching events into
/// `events` in FIFO order until `unsubscribe` is called or the client
/// shuts down (channel close = delivery stopped).
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::Receiver<ChangeEvent>,
}

// ============================================================================
// RealtimeClient
// ============================================================================

/// The external store, seen through the narrowest interface the components
/// need. All delivery is asynchronous; FIFO holds within one subscription
/// but not across topics.
#[async_trait]
pub trait RealtimeClient: Send + Sync {
    /// Open a filtered change stream. Errors here are fatal to the
    /// component activation that requested the stream.
    async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<Subscription, StoreError>;

    /// Stop delivery for a subscription. Idempotent — unknown or
    /// already-removed ids are a no-op.
    async fn unsubscribe(&self, id: &SubscriptionId);

    /// Issue a write. The store authenticates and authorizes the caller;
    /// an authorization failure surfaces as `StoreErrorKind::Auth`.
    async fn request(&self, req: StoreRequest) -> Result<(), StoreError>;

    /// Read current rows for an initial load.
    async fn fetch(
        &self,
        topic: &str,
        filter: Option<&EqFilter>,
    ) -> Result<Vec<Record>, StoreError>;
}

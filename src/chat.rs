//! ChatRoom — an append-ordered message feed for one conversation.
//!
//! Incoming Insert events append and fire the scroll-to-latest hook;
//! edits and deletions of history merge without moving the view. Sending
//! is deliberately not optimistic: the message is written to the store and
//! the subscription echo appends it, so every participant sees the same
//! arrival order.

use std::sync::Arc;

use serde_json::json;

use crate::client::{RealtimeClient, StoreError, StoreRequest};
use crate::error::SubscribeError;
use crate::projector::{shared, AppendCallback, ChangeFeedProjector, ProjectorHandle, SharedView};
use crate::types::{EqFilter, Record, SubscriptionSpec};
use crate::view::{LocalView, OrderedView};

// ============================================================================
// Options
// ============================================================================

/// Configuration for [`ChatRoom`].
pub struct ChatRoomOptions {
    /// Table/stream holding messages (default `"messages"`).
    pub topic: String,
    /// Column linking a message to its conversation (default
    /// `"conversation_id"`).
    pub conversation_field: String,
    /// The conversation this room shows.
    pub chat_id: String,
    /// Sender id stamped on outgoing messages.
    pub sender_id: String,
    /// Scroll-to-latest hook, fired once per appended message.
    pub on_new_message: Option<Arc<AppendCallback>>,
}

impl ChatRoomOptions {
    pub fn new(chat_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            topic: "messages".to_string(),
            conversation_field: "conversation_id".to_string(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            on_new_message: None,
        }
    }

    #[must_use]
    pub fn on_new_message(mut self, callback: impl Fn(&Record) + Send + Sync + 'static) -> Self {
        self.on_new_message = Some(Arc::new(callback));
        self
    }
}

// ============================================================================
// ChatRoom
// ============================================================================

pub struct ChatRoom {
    client: Arc<dyn RealtimeClient>,
    topic: String,
    conversation_field: String,
    chat_id: String,
    sender_id: String,
    on_new_message: Option<Arc<AppendCallback>>,
    view: SharedView<OrderedView>,
    handle: Option<ProjectorHandle<OrderedView>>,
}

impl ChatRoom {
    pub fn new(client: Arc<dyn RealtimeClient>, options: ChatRoomOptions) -> Self {
        Self {
            client,
            topic: options.topic,
            conversation_field: options.conversation_field,
            chat_id: options.chat_id,
            sender_id: options.sender_id,
            on_new_message: options.on_new_message,
            view: shared(OrderedView::new()),
            handle: None,
        }
    }

    /// Subscribe to this conversation's messages and seed with history.
    pub async fn activate(&mut self) -> Result<(), SubscribeError> {
        let spec = SubscriptionSpec::filtered(
            self.topic.clone(),
            EqFilter::new(self.conversation_field.clone(), json!(self.chat_id)),
        );
        let mut projector =
            ChangeFeedProjector::new(Arc::clone(&self.client), spec, Arc::clone(&self.view));
        if let Some(callback) = &self.on_new_message {
            let callback = Arc::clone(callback);
            projector = projector.on_append(move |record| callback(record));
        }
        self.handle = Some(projector.activate_seeded().await?);
        Ok(())
    }

    /// Tear the subscription down. Idempotent.
    pub async fn deactivate(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.deactivate().await;
        }
    }

    /// Write a message to the store. The subscription echo appends it to
    /// the local view — no optimistic insert.
    pub async fn send(&self, content: &str) -> Result<(), StoreError> {
        let mut payload = serde_json::Map::new();
        payload.insert(self.conversation_field.clone(), json!(self.chat_id));
        payload.insert("sender_id".to_string(), json!(self.sender_id));
        payload.insert("content".to_string(), json!(content));
        self.client
            .request(StoreRequest::insert(
                self.topic.clone(),
                serde_json::Value::Object(payload),
            ))
            .await
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> Vec<Record> {
        self.view.lock().records().to_vec()
    }

    /// The underlying shared view, for tests and custom rendering.
    pub fn view(&self) -> &SharedView<OrderedView> {
        &self.view
    }
}

//! Shared mock collaborator for integration tests.
//!
//! Closure-programmable responses behind a `parking_lot::Mutex`, plus call
//! logs, in the same shape the library expects from a real client: events
//! pushed here flow through per-subscription channels.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use viewsync::client::{
    RealtimeClient, StoreError, StoreRequest, Subscription, SubscriptionId,
};
use viewsync::types::{ChangeEvent, EqFilter, Record, SubscriptionSpec};

type FetchFn =
    Box<dyn Fn(&str, Option<&EqFilter>) -> Result<Vec<Record>, StoreError> + Send + Sync>;
type RequestFn = Box<dyn Fn(&StoreRequest) -> Result<(), StoreError> + Send + Sync>;

struct MockClientInner {
    next_id: u64,
    senders: HashMap<u64, mpsc::Sender<ChangeEvent>>,
    subscribe_calls: Vec<SubscriptionSpec>,
    unsubscribe_calls: Vec<SubscriptionId>,
    request_calls: Vec<StoreRequest>,
    fetch_calls: Vec<String>,
    subscribe_error: Option<StoreError>,
    fetch_response: Option<FetchFn>,
    request_response: Option<RequestFn>,
    request_delay: Option<Duration>,
}

pub struct MockClient {
    inner: Mutex<MockClientInner>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockClientInner {
                next_id: 1,
                senders: HashMap::new(),
                subscribe_calls: Vec::new(),
                unsubscribe_calls: Vec::new(),
                request_calls: Vec::new(),
                fetch_calls: Vec::new(),
                subscribe_error: None,
                fetch_response: None,
                request_response: None,
                request_delay: None,
            }),
        }
    }

    /// Make the next `subscribe` call fail.
    pub fn fail_subscribe(&self, error: StoreError) {
        self.inner.lock().subscribe_error = Some(error);
    }

    pub fn on_fetch(
        &self,
        f: impl Fn(&str, Option<&EqFilter>) -> Result<Vec<Record>, StoreError>
            + Send
            + Sync
            + 'static,
    ) {
        self.inner.lock().fetch_response = Some(Box::new(f));
    }

    pub fn on_request(
        &self,
        f: impl Fn(&StoreRequest) -> Result<(), StoreError> + Send + Sync + 'static,
    ) {
        self.inner.lock().request_response = Some(Box::new(f));
    }

    /// Delay every `request` call (for timeout tests under paused time).
    pub fn set_request_delay(&self, delay: Duration) {
        self.inner.lock().request_delay = Some(delay);
    }

    /// Deliver an event to every live subscription. The library re-checks
    /// filters, so the mock does not filter server-side.
    pub async fn push(&self, event: ChangeEvent) {
        let senders: Vec<mpsc::Sender<ChangeEvent>> =
            self.inner.lock().senders.values().cloned().collect();
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }

    pub fn subscribe_calls(&self) -> Vec<SubscriptionSpec> {
        self.inner.lock().subscribe_calls.clone()
    }

    pub fn unsubscribe_calls(&self) -> Vec<SubscriptionId> {
        self.inner.lock().unsubscribe_calls.clone()
    }

    pub fn request_calls(&self) -> Vec<StoreRequest> {
        self.inner.lock().request_calls.clone()
    }

    pub fn fetch_calls(&self) -> Vec<String> {
        self.inner.lock().fetch_calls.clone()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

#[async_trait]
impl RealtimeClient for MockClient {
    async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<Subscription, StoreError> {
        let mut inner = self.inner.lock();
        inner.subscribe_calls.push(spec.clone());
        if let Some(error) = inner.subscribe_error.take() {
            return Err(error);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = mpsc::channel(64);
        inner.senders.insert(id, tx);
        Ok(Subscription {
            id: SubscriptionId(id),
            events: rx,
        })
    }

    async fn unsubscribe(&self, id: &SubscriptionId) {
        let mut inner = self.inner.lock();
        inner.unsubscribe_calls.push(id.clone());
        inner.senders.remove(&id.0);
    }

    async fn request(&self, req: StoreRequest) -> Result<(), StoreError> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.request_calls.push(req.clone());
            inner.request_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner.lock();
        match &inner.request_response {
            Some(f) => f(&req),
            None => Ok(()),
        }
    }

    async fn fetch(
        &self,
        topic: &str,
        filter: Option<&EqFilter>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut inner = self.inner.lock();
        inner.fetch_calls.push(topic.to_string());
        if let Some(f) = &inner.fetch_response {
            f(topic, filter)
        } else {
            Ok(Vec::new())
        }
    }
}

/// Poll `cond` until it holds or a wall-clock budget runs out. Used to wait
/// for the background listener to drain the channel.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within timeout");
}

//! ChangeFeedProjector integration tests against the mock client.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use common::{wait_until, MockClient};
use viewsync::client::StoreError;
use viewsync::error::SubscribeError;
use viewsync::projector::{shared, ChangeFeedProjector};
use viewsync::types::{ChangeEvent, EqFilter, Record, SubscriptionSpec};
use viewsync::view::{KeyedView, LocalView, OrderedView};

// ============================================================================
// Helpers
// ============================================================================

fn msg(id: &str, text: &str) -> Record {
    Record::new(id, json!({ "conversation_id": "c1", "text": text }))
}

fn insert(record: Record) -> ChangeEvent {
    ChangeEvent::Insert {
        topic: "messages".to_string(),
        new: record,
    }
}

fn update(record: Record) -> ChangeEvent {
    ChangeEvent::Update {
        topic: "messages".to_string(),
        old: None,
        new: record,
    }
}

fn delete(record: Record) -> ChangeEvent {
    ChangeEvent::Delete {
        topic: "messages".to_string(),
        old: record,
    }
}

// ============================================================================
// Insert projection + scroll hook
// ============================================================================

#[tokio::test]
async fn insert_event_appends_and_fires_scroll_once() {
    let client = Arc::new(MockClient::new());
    let view = shared(OrderedView::new());
    let scrolls = Arc::new(AtomicUsize::new(0));

    let scrolls_clone = Arc::clone(&scrolls);
    let mut handle = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::all("messages"),
        Arc::clone(&view),
    )
    .on_append(move |_| {
        scrolls_clone.fetch_add(1, Ordering::SeqCst);
    })
    .activate()
    .await
    .expect("activate");

    assert!(view.lock().is_empty());

    client.push(insert(msg("1", "hi"))).await;
    wait_until(|| view.lock().len() == 1).await;

    {
        let guard = view.lock();
        assert_eq!(guard.records()[0].id, "1");
        assert_eq!(guard.records()[0].field("text"), Some(&json!("hi")));
    }
    assert_eq!(scrolls.load(Ordering::SeqCst), 1, "scroll fires exactly once");

    handle.deactivate().await;
}

#[tokio::test]
async fn update_and_delete_do_not_fire_scroll() {
    let client = Arc::new(MockClient::new());
    let view = shared(OrderedView::new());
    let scrolls = Arc::new(AtomicUsize::new(0));

    let scrolls_clone = Arc::clone(&scrolls);
    let mut handle = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::all("messages"),
        Arc::clone(&view),
    )
    .on_append(move |_| {
        scrolls_clone.fetch_add(1, Ordering::SeqCst);
    })
    .activate()
    .await
    .expect("activate");

    client.push(insert(msg("1", "hi"))).await;
    wait_until(|| view.lock().len() == 1).await;

    client.push(update(msg("1", "edited"))).await;
    wait_until(|| view.lock().get("1").unwrap().field("text") == Some(&json!("edited"))).await;

    client.push(delete(msg("1", ""))).await;
    wait_until(|| view.lock().is_empty()).await;

    assert_eq!(
        scrolls.load(Ordering::SeqCst),
        1,
        "only the insert scrolls; the update and delete must not"
    );

    handle.deactivate().await;
}

// ============================================================================
// Filtering
// ============================================================================

#[tokio::test]
async fn filtered_subscription_skips_non_matching_inserts() {
    let client = Arc::new(MockClient::new());
    let view = shared(OrderedView::new());

    let mut handle = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::filtered("messages", EqFilter::new("conversation_id", json!("c1"))),
        Arc::clone(&view),
    )
    .activate()
    .await
    .expect("activate");

    let other = Record::new("9", json!({ "conversation_id": "c2", "text": "x" }));
    client.push(insert(other)).await;
    client.push(insert(msg("1", "mine"))).await;

    wait_until(|| view.lock().len() == 1).await;
    assert_eq!(view.lock().records()[0].id, "1");

    handle.deactivate().await;
}

#[tokio::test]
async fn update_leaving_the_filtered_set_evicts_the_record() {
    let client = Arc::new(MockClient::new());
    let view = shared(KeyedView::new());

    let mut handle = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::filtered("messages", EqFilter::new("status", json!("pending"))),
        Arc::clone(&view),
    )
    .activate()
    .await
    .expect("activate");

    let pending = Record::new("5", json!({ "status": "pending" }));
    client.push(insert(pending)).await;
    wait_until(|| view.lock().len() == 1).await;

    // Another writer moved the record out of the filtered set.
    let approved = Record::new("5", json!({ "status": "active" }));
    client.push(update(approved)).await;
    wait_until(|| view.lock().is_empty()).await;

    handle.deactivate().await;
}

// ============================================================================
// Isolated merge failures
// ============================================================================

#[tokio::test]
async fn malformed_event_is_dropped_and_stream_continues() {
    let client = Arc::new(MockClient::new());
    let view = shared(OrderedView::new());

    let mut handle = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::all("messages"),
        Arc::clone(&view),
    )
    .activate()
    .await
    .expect("activate");

    // Empty record id: dropped with a warning, not fatal.
    client.push(insert(Record::new("", json!({})))).await;
    // Wrong topic: also dropped.
    client
        .push(ChangeEvent::Insert {
            topic: "other".to_string(),
            new: msg("2", "stray"),
        })
        .await;
    // A well-formed event afterwards still lands.
    client.push(insert(msg("3", "fine"))).await;

    wait_until(|| view.lock().len() == 1).await;
    assert_eq!(view.lock().records()[0].id, "3");

    handle.deactivate().await;
}

// ============================================================================
// Establishment failure
// ============================================================================

#[tokio::test]
async fn subscribe_failure_surfaces_to_caller() {
    let client = Arc::new(MockClient::new());
    client.fail_subscribe(StoreError::new("connection refused"));

    let view = shared(OrderedView::new());
    let error = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::all("messages"),
        view,
    )
    .activate()
    .await
    .err()
    .expect("activation must fail");

    match error {
        SubscribeError::Establish { topic, .. } => assert_eq!(topic, "messages"),
        other => panic!("expected Establish error, got {other:?}"),
    }
}

// ============================================================================
// Seeded activation
// ============================================================================

#[tokio::test]
async fn seeded_activation_loads_history_then_merges_live_events() {
    let client = Arc::new(MockClient::new());
    client.on_fetch(|_, _| Ok(vec![Record::new("1", json!({ "text": "old" }))]));

    let view = shared(OrderedView::new());
    let mut handle = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::all("messages"),
        Arc::clone(&view),
    )
    .activate_seeded()
    .await
    .expect("activate");

    assert_eq!(view.lock().len(), 1, "history seeded before any live event");
    assert_eq!(client.fetch_calls(), vec!["messages".to_string()]);

    client.push(insert(msg("2", "new"))).await;
    wait_until(|| view.lock().len() == 2).await;

    let ids: Vec<String> = view.lock().records().iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec!["1", "2"], "live events merge on top of the seed");

    handle.deactivate().await;
}

#[tokio::test]
async fn failed_initial_load_releases_the_subscription() {
    let client = Arc::new(MockClient::new());
    client.on_fetch(|_, _| Err(StoreError::new("read failed")));

    let view = shared(OrderedView::new());
    let result = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::all("messages"),
        view,
    )
    .activate_seeded()
    .await;

    assert!(matches!(result, Err(SubscribeError::InitialLoad { .. })));
    assert_eq!(
        client.unsubscribe_calls().len(),
        1,
        "the just-opened subscription must be released on load failure"
    );
}

// ============================================================================
// Deactivation
// ============================================================================

#[tokio::test]
async fn deactivate_is_idempotent() {
    let client = Arc::new(MockClient::new());
    let view = shared(OrderedView::new());

    let mut handle = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::all("messages"),
        Arc::clone(&view),
    )
    .activate()
    .await
    .expect("activate");

    handle.deactivate().await;
    assert_eq!(client.unsubscribe_calls().len(), 1);
    assert!(!handle.is_active());

    handle.deactivate().await;
    assert_eq!(
        client.unsubscribe_calls().len(),
        1,
        "second deactivate has no additional effect"
    );
}

#[tokio::test]
async fn no_event_is_merged_after_deactivation() {
    let client = Arc::new(MockClient::new());
    let view = shared(OrderedView::new());

    let mut handle = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::all("messages"),
        Arc::clone(&view),
    )
    .activate()
    .await
    .expect("activate");

    client.push(insert(msg("1", "before"))).await;
    wait_until(|| view.lock().len() == 1).await;

    handle.deactivate().await;

    // Delivery after teardown: the mock has dropped the sender on
    // unsubscribe, and even a queued event would hit the is-active guard.
    client.push(insert(msg("2", "after"))).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    assert_eq!(view.lock().len(), 1, "no merge may land after deactivate");
}

#[tokio::test]
async fn dropping_the_handle_stops_the_listener() {
    let client = Arc::new(MockClient::new());
    let view = shared(OrderedView::new());

    let handle = ChangeFeedProjector::new(
        Arc::clone(&client) as _,
        SubscriptionSpec::all("messages"),
        Arc::clone(&view),
    )
    .activate()
    .await
    .expect("activate");

    drop(handle);

    client.push(insert(msg("1", "late"))).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    assert!(
        view.lock().is_empty(),
        "listener must stop after the handle is dropped"
    );
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single row as delivered by the store. `data` is the full payload
/// (an object map); `id` is the store-assigned primary key, also present
/// inside `data` when the store includes it there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub data: Value,
}

impl Record {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Read a field from the payload, `None` if the payload is not an
    /// object or the field is absent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_object().and_then(|m| m.get(name))
    }
}

/// A row-level change notification emitted by the store.
///
/// `old` on [`ChangeEvent::Update`] is only populated when the store
/// delivers prior images; merge logic must not rely on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeEvent {
    Insert {
        topic: String,
        new: Record,
    },
    Update {
        topic: String,
        old: Option<Record>,
        new: Record,
    },
    Delete {
        topic: String,
        old: Record,
    },
}

impl ChangeEvent {
    /// The stream/table this event belongs to.
    pub fn topic(&self) -> &str {
        match self {
            Self::Insert { topic, .. } => topic,
            Self::Update { topic, .. } => topic,
            Self::Delete { topic, .. } => topic,
        }
    }

    /// Id of the affected record.
    pub fn record_id(&self) -> &str {
        match self {
            Self::Insert { new, .. } => &new.id,
            Self::Update { new, .. } => &new.id,
            Self::Delete { old, .. } => &old.id,
        }
    }

    /// The record image carried by the event: `new` for Insert/Update,
    /// `old` for Delete.
    pub fn record(&self) -> &Record {
        match self {
            Self::Insert { new, .. } => new,
            Self::Update { new, .. } => new,
            Self::Delete { old, .. } => old,
        }
    }
}

/// An equality predicate over one record field (`field = value`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqFilter {
    pub field: String,
    pub value: Value,
}

impl EqFilter {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    /// Whether `record` satisfies the predicate.
    pub fn matches(&self, record: &Record) -> bool {
        record.field(&self.field) == Some(&self.value)
    }
}

/// Identifies a change stream: exactly one topic, at most one equality
/// filter. One active subscription per component instance per stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub topic: String,
    pub filter: Option<EqFilter>,
}

impl SubscriptionSpec {
    pub fn all(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            filter: None,
        }
    }

    pub fn filtered(topic: impl Into<String>, filter: EqFilter) -> Self {
        Self {
            topic: topic.into(),
            filter: Some(filter),
        }
    }

    /// Whether an event belongs to this subscription: topic must match and,
    /// if a filter is set, the event's record image must satisfy it.
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        if event.topic() != self.topic {
            return false;
        }
        match &self.filter {
            Some(f) => f.matches(event.record()),
            None => true,
        }
    }
}

//! Local views — the in-memory projections the UI reads.
//!
//! A view is always a function of (seeded initial load ∪ applied change
//! events ∪ live optimistic mutations − rolled-back mutations). Merge
//! semantics are deterministic and order-preserving: delivering E1..En
//! yields `merge(..merge(V0, E1).., En)`.
//!
//! Two shapes:
//!   - [`OrderedView`] — append-ordered (arrival order = display order).
//!     Insert is a literal append; duplicate delivery of the same id
//!     produces a duplicate entry.
//!   - [`KeyedView`] — id-keyed; insert is insert-or-overwrite, so the view
//!     holds at most one entry per id.
//!
//! Both support per-record snapshots: the rollback unit for optimistic
//! mutations. Restoring a snapshot reverses only the engaged record's
//! effect — merges applied to other records in the interim survive.

use crate::types::{ChangeEvent, Record};

// ============================================================================
// MergeOutcome
// ============================================================================

/// What a merge did to the view. `Appended` is only produced by ordered
/// views — it is the signal for the scroll-to-latest effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Insert appended to the end of an ordered view.
    Appended,
    /// Insert inserted or overwrote an entry in a keyed view.
    Upserted,
    /// Update replaced an existing entry.
    Replaced,
    /// Delete removed an existing entry.
    Removed,
    /// Update/Delete for an id not present — view unchanged.
    Ignored,
}

// ============================================================================
// RecordSnapshot
// ============================================================================

/// The engaged record's state immediately before an optimistic transform:
/// every occurrence of the id (ordered views may hold duplicates) with its
/// position. An empty occurrence list means the record was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    record_id: String,
    occurrences: Vec<(usize, Record)>,
}

impl RecordSnapshot {
    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn was_present(&self) -> bool {
        !self.occurrences.is_empty()
    }
}

// ============================================================================
// LocalView
// ============================================================================

/// An in-memory projection that change events merge into and optimistic
/// mutations transform.
pub trait LocalView: Send + 'static {
    /// Apply one change event. Must never fail: Update/Delete for an
    /// absent id is `Ignored`, not an error.
    fn merge(&mut self, event: &ChangeEvent) -> MergeOutcome;

    /// Replace the entire contents with an initial load.
    fn seed(&mut self, records: Vec<Record>);

    /// Current contents in display order.
    fn records(&self) -> &[Record];

    /// First entry with the given id, if any.
    fn get(&self, id: &str) -> Option<&Record>;

    /// Remove every entry with the given id, returning how many were
    /// removed. The transform side of an optimistic removal.
    fn remove(&mut self, id: &str) -> usize;

    /// Capture the engaged record's state for later rollback.
    fn snapshot_record(&self, id: &str) -> RecordSnapshot;

    /// Reverse the engaged record's effect: drop its current entries and
    /// re-insert the snapshotted occurrences at their saturated positions.
    /// Entries for other ids are left untouched.
    fn restore_record(&mut self, snapshot: RecordSnapshot);

    fn len(&self) -> usize {
        self.records().len()
    }

    fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

// ----------------------------------------------------------------------------
// Shared merge plumbing
// ----------------------------------------------------------------------------

/// Backing storage common to both view shapes — a display-ordered `Vec`.
/// The shapes differ only in what Insert does.
fn replace_by_id(entries: &mut Vec<Record>, record: &Record) -> MergeOutcome {
    match entries.iter_mut().find(|r| r.id == record.id) {
        Some(slot) => {
            *slot = record.clone();
            MergeOutcome::Replaced
        }
        None => MergeOutcome::Ignored,
    }
}

fn remove_by_id(entries: &mut Vec<Record>, id: &str) -> usize {
    let before = entries.len();
    entries.retain(|r| r.id != id);
    before - entries.len()
}

fn snapshot_by_id(entries: &[Record], id: &str) -> RecordSnapshot {
    RecordSnapshot {
        record_id: id.to_string(),
        occurrences: entries
            .iter()
            .enumerate()
            .filter(|(_, r)| r.id == id)
            .map(|(i, r)| (i, r.clone()))
            .collect(),
    }
}

fn restore_by_id(entries: &mut Vec<Record>, snapshot: RecordSnapshot) {
    remove_by_id(entries, &snapshot.record_id);
    for (index, record) in snapshot.occurrences {
        let at = index.min(entries.len());
        entries.insert(at, record);
    }
}

// ============================================================================
// OrderedView
// ============================================================================

/// Append-ordered view for chronological feeds (chat messages).
#[derive(Debug, Clone, Default)]
pub struct OrderedView {
    entries: Vec<Record>,
}

impl OrderedView {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalView for OrderedView {
    fn merge(&mut self, event: &ChangeEvent) -> MergeOutcome {
        match event {
            // Literal append: a duplicate delivery of the same id appends
            // a duplicate entry.
            ChangeEvent::Insert { new, .. } => {
                self.entries.push(new.clone());
                MergeOutcome::Appended
            }
            ChangeEvent::Update { new, .. } => replace_by_id(&mut self.entries, new),
            ChangeEvent::Delete { old, .. } => {
                if remove_by_id(&mut self.entries, &old.id) > 0 {
                    MergeOutcome::Removed
                } else {
                    MergeOutcome::Ignored
                }
            }
        }
    }

    fn seed(&mut self, records: Vec<Record>) {
        self.entries = records;
    }

    fn records(&self) -> &[Record] {
        &self.entries
    }

    fn get(&self, id: &str) -> Option<&Record> {
        self.entries.iter().find(|r| r.id == id)
    }

    fn remove(&mut self, id: &str) -> usize {
        remove_by_id(&mut self.entries, id)
    }

    fn snapshot_record(&self, id: &str) -> RecordSnapshot {
        snapshot_by_id(&self.entries, id)
    }

    fn restore_record(&mut self, snapshot: RecordSnapshot) {
        restore_by_id(&mut self.entries, snapshot);
    }
}

// ============================================================================
// KeyedView
// ============================================================================

/// Id-keyed view for pending-item collections (moderation queues).
/// Insertion order is kept for display; at most one entry per id.
#[derive(Debug, Clone, Default)]
pub struct KeyedView {
    entries: Vec<Record>,
}

impl KeyedView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|r| r.id == id)
    }
}

impl LocalView for KeyedView {
    fn merge(&mut self, event: &ChangeEvent) -> MergeOutcome {
        match event {
            ChangeEvent::Insert { new, .. } => {
                match self.entries.iter().position(|r| r.id == new.id) {
                    Some(i) => self.entries[i] = new.clone(),
                    None => self.entries.push(new.clone()),
                }
                MergeOutcome::Upserted
            }
            ChangeEvent::Update { new, .. } => replace_by_id(&mut self.entries, new),
            ChangeEvent::Delete { old, .. } => {
                if remove_by_id(&mut self.entries, &old.id) > 0 {
                    MergeOutcome::Removed
                } else {
                    MergeOutcome::Ignored
                }
            }
        }
    }

    fn seed(&mut self, records: Vec<Record>) {
        // Last write wins for duplicate ids in the load.
        self.entries.clear();
        for record in records {
            match self.entries.iter().position(|r| r.id == record.id) {
                Some(i) => self.entries[i] = record,
                None => self.entries.push(record),
            }
        }
    }

    fn records(&self) -> &[Record] {
        &self.entries
    }

    fn get(&self, id: &str) -> Option<&Record> {
        self.entries.iter().find(|r| r.id == id)
    }

    fn remove(&mut self, id: &str) -> usize {
        remove_by_id(&mut self.entries, id)
    }

    fn snapshot_record(&self, id: &str) -> RecordSnapshot {
        snapshot_by_id(&self.entries, id)
    }

    fn restore_record(&mut self, snapshot: RecordSnapshot) {
        restore_by_id(&mut self.entries, snapshot);
    }
}

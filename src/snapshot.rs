//! Snapshots of the current table and the bounded slots that hold them.

use crate::table::Table;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// An immutable copy of a table at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: Uuid,
    pub label: String,
    pub taken_at: DateTime<Utc>,
    pub row_count: usize,
    pub column_count: usize,
    table: Arc<Table>,
}

impl Snapshot {
    pub fn capture(table: &Table, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            taken_at: Utc::now(),
            row_count: table.row_count(),
            column_count: table.column_count(),
            table: Arc::new(table.clone()),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }
}

/// Holds up to `capacity` snapshots, evicting the oldest.
#[derive(Debug)]
pub struct SnapshotManager {
    capacity: usize,
    slots: VecDeque<Snapshot>,
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SnapshotManager {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        while self.slots.len() >= self.capacity {
            self.slots.pop_front();
        }
        self.slots.push_back(snapshot);
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.slots.back()
    }

    pub fn pop_latest(&mut self) -> Option<Snapshot> {
        self.slots.pop_back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

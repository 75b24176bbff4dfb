//! Collection View
//!
//! The ordered index of a collection's members. Local edits change it
//! optimistically; backend snapshots and child events reconcile it.
//!
//! Priorities stay strictly increasing along the view. Inserting at `i` gives
//! the new record `priority(i - 1) + 1` (or `0` at the head) and bumps each
//! following record that would no longer sort after its predecessor. The
//! bumped records are returned so their persisted form can be re-staged.
//! Removal never renumbers.

use crate::db::{DataEvent, DataSnapshot};
use crate::models::ItemRecord;
use crate::representer::CodingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    /// Never loaded from the backend
    Unprepared,
    Preparing,
    Prepared,
}

/// How the view changed after an apply or a local edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewChange {
    /// The whole sequence was replaced
    Initial,
    Updated {
        deleted: Vec<usize>,
        inserted: Vec<usize>,
        modified: Vec<usize>,
        moved: Vec<(usize, usize)>,
    },
}

impl ViewChange {
    fn empty() -> Self {
        Self::Updated {
            deleted: Vec::new(),
            inserted: Vec::new(),
            modified: Vec::new(),
            moved: Vec::new(),
        }
    }

    pub(crate) fn inserted(index: usize) -> Self {
        Self::Updated {
            deleted: Vec::new(),
            inserted: vec![index],
            modified: Vec::new(),
            moved: Vec::new(),
        }
    }

    pub(crate) fn deleted(index: usize) -> Self {
        Self::Updated {
            deleted: vec![index],
            inserted: Vec::new(),
            modified: Vec::new(),
            moved: Vec::new(),
        }
    }

    fn relocated(from: usize, to: usize) -> Self {
        if from == to {
            Self::Updated {
                deleted: Vec::new(),
                inserted: Vec::new(),
                modified: vec![to],
                moved: Vec::new(),
            }
        } else {
            Self::Updated {
                deleted: Vec::new(),
                inserted: Vec::new(),
                modified: Vec::new(),
                moved: vec![(from, to)],
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(
            self,
            Self::Updated { deleted, inserted, modified, moved }
                if deleted.is_empty() && inserted.is_empty() && modified.is_empty() && moved.is_empty()
        )
    }
}

/// A record bumped by an insert, with the priority it had before
#[derive(Debug, Clone)]
pub struct Shifted {
    pub record: ItemRecord,
    pub previous_priority: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CollectionView {
    items: Vec<ItemRecord>,
    preparation: Preparation,
    /// Local edits staged but neither committed nor reverted
    pending: usize,
}

impl Default for CollectionView {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionView {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            preparation: Preparation::Unprepared,
            pending: 0,
        }
    }

    /// An empty view known to match the backend, for collections created locally
    pub fn prepared() -> Self {
        Self {
            preparation: Preparation::Prepared,
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ItemRecord> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ItemRecord> {
        self.items.iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(|item| item.key.clone()).collect()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|item| item.key == key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn preparation(&self) -> Preparation {
        self.preparation
    }

    pub fn is_prepared(&self) -> bool {
        self.preparation == Preparation::Prepared
    }

    pub(crate) fn set_preparation(&mut self, preparation: Preparation) {
        self.preparation = preparation;
    }

    /// Local edits not yet confirmed by a successful commit
    pub fn has_changes(&self) -> bool {
        self.pending > 0
    }

    pub fn pending_changes(&self) -> usize {
        self.pending
    }

    /// One local edit was committed or reverted
    pub(crate) fn settle(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    /// Insert `item` at `index`, assigning its priority
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&mut self, mut item: ItemRecord, index: usize) -> Vec<Shifted> {
        assert!(
            index <= self.items.len(),
            "Insert index {} out of range for view of length {}",
            index,
            self.items.len()
        );

        let priority = match index {
            0 => 0,
            _ => self.items[index - 1].effective_priority().saturating_add(1),
        };
        item.priority = Some(priority);
        self.items.insert(index, item);
        self.pending += 1;

        let mut shifted = Vec::new();
        let mut previous = priority;
        for record in self.items.iter_mut().skip(index + 1) {
            if record.effective_priority() <= previous {
                let previous_priority = record.priority;
                record.priority = Some(previous.saturating_add(1));
                shifted.push(Shifted {
                    record: record.clone(),
                    previous_priority,
                });
            }
            previous = record.effective_priority();
        }
        shifted
    }

    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn remove(&mut self, index: usize) -> ItemRecord {
        assert!(
            index < self.items.len(),
            "Remove index {} out of range for view of length {}",
            index,
            self.items.len()
        );
        self.pending += 1;
        self.items.remove(index)
    }

    /// Undo a single insert made while other edits were pending
    pub(crate) fn undo_insert(&mut self, key: &str, shifted: &[Shifted]) {
        if let Some(index) = self.position(key) {
            self.items.remove(index);
        }
        for entry in shifted {
            if let Some(index) = self.position(&entry.record.key) {
                self.items[index].priority = entry.previous_priority;
            }
        }
        self.items.sort_by(ItemRecord::cmp_order);
    }

    /// Undo a single removal made while other edits were pending
    pub(crate) fn undo_remove(&mut self, item: ItemRecord, index: usize) {
        if self.contains_key(&item.key) {
            return;
        }
        let index = index.min(self.items.len());
        self.items.insert(index, item);
    }

    /// A closure restoring the view's records to exactly their current contents
    ///
    /// The pending edit count is left alone.
    pub fn current_reversion(&self) -> impl Fn(&mut CollectionView) + Send + Sync + 'static {
        let items = self.items.clone();
        move |view| view.items = items.clone()
    }

    /// Reconcile with backend data
    ///
    /// A `Value` snapshot replaces the whole sequence; child events patch one
    /// record and keep the ordering rule.
    pub fn apply(
        &mut self,
        snapshot: &DataSnapshot,
        event: DataEvent,
    ) -> Result<ViewChange, CodingError> {
        match event {
            DataEvent::Value => {
                let mut items = snapshot
                    .children()
                    .iter()
                    .map(ItemRecord::from_snapshot)
                    .collect::<Result<Vec<_>, _>>()?;
                items.sort_by(ItemRecord::cmp_order);
                self.items = items;
                Ok(ViewChange::Initial)
            }
            DataEvent::ChildAdded | DataEvent::ChildChanged => {
                let record = ItemRecord::from_snapshot(snapshot)?;
                match self.position(&record.key) {
                    Some(from) => {
                        self.items.remove(from);
                        let to = self.sorted_position(&record);
                        self.items.insert(to, record);
                        Ok(ViewChange::relocated(from, to))
                    }
                    None => {
                        let to = self.sorted_position(&record);
                        self.items.insert(to, record);
                        Ok(ViewChange::inserted(to))
                    }
                }
            }
            DataEvent::ChildRemoved => match self.position(snapshot.key()) {
                Some(index) => {
                    self.items.remove(index);
                    Ok(ViewChange::deleted(index))
                }
                None => Ok(ViewChange::empty()),
            },
        }
    }

    fn sorted_position(&self, record: &ItemRecord) -> usize {
        self.items
            .partition_point(|item| item.cmp_order(record) == std::cmp::Ordering::Less)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Node;
    use serde_json::json;

    fn keys(view: &CollectionView) -> Vec<String> {
        view.keys()
    }

    fn priorities(view: &CollectionView) -> Vec<i64> {
        view.iter().map(ItemRecord::effective_priority).collect()
    }

    #[test]
    fn test_append_assigns_sequential_priorities() {
        let mut view = CollectionView::prepared();
        view.insert(ItemRecord::new("a"), 0);
        view.insert(ItemRecord::new("b"), 1);
        view.insert(ItemRecord::new("c"), 2);

        assert_eq!(keys(&view), vec!["a", "b", "c"]);
        assert_eq!(priorities(&view), vec![0, 1, 2]);
        assert!(view.has_changes());
    }

    #[test]
    fn test_insert_shifts_following_records() {
        let mut view = CollectionView::prepared();
        view.insert(ItemRecord::new("e1"), 0);
        let shifted = view.insert(ItemRecord::new("e2"), 0);

        assert_eq!(keys(&view), vec!["e2", "e1"]);
        assert_eq!(priorities(&view), vec![0, 1]);
        assert_eq!(shifted.len(), 1);
        assert_eq!(shifted[0].record.key, "e1");
        assert_eq!(shifted[0].previous_priority, Some(0));
    }

    #[test]
    fn test_insert_into_sparse_priorities_only_bumps_when_needed() {
        let mut view = CollectionView::prepared();
        let snapshot = DataSnapshot::new(
            Node::from_path("/items"),
            Some(json!({"a": {"__i": 0}, "b": {"__i": 10}, "c": {"__i": 11}})),
        );
        view.apply(&snapshot, DataEvent::Value).unwrap();

        let shifted = view.insert(ItemRecord::new("x"), 1);
        assert!(shifted.is_empty());
        assert_eq!(keys(&view), vec!["a", "x", "b", "c"]);
        assert_eq!(priorities(&view), vec![0, 1, 10, 11]);
    }

    #[test]
    fn test_insert_between_equal_priorities() {
        let mut view = CollectionView::prepared();
        let snapshot = DataSnapshot::new(
            Node::from_path("/items"),
            Some(json!({"a": {}, "b": {}, "c": {}})),
        );
        view.apply(&snapshot, DataEvent::Value).unwrap();

        let shifted = view.insert(ItemRecord::new("x"), 1);
        assert_eq!(keys(&view), vec!["a", "x", "b", "c"]);
        assert_eq!(priorities(&view), vec![0, 1, 2, 3]);
        assert_eq!(shifted.len(), 2);
    }

    #[test]
    fn test_current_reversion_restores_exactly() {
        let mut view = CollectionView::prepared();
        view.insert(ItemRecord::new("a"), 0);
        view.settle();
        let restore = view.current_reversion();

        view.insert(ItemRecord::new("b"), 0);
        view.remove(1);
        assert_eq!(keys(&view), vec!["b"]);
        assert_eq!(view.pending_changes(), 2);

        restore(&mut view);
        assert_eq!(keys(&view), vec!["a"]);
        assert_eq!(priorities(&view), vec![0]);
        assert_eq!(view.pending_changes(), 2);
    }

    #[test]
    fn test_settle_counts_down_pending_edits() {
        let mut view = CollectionView::prepared();
        view.insert(ItemRecord::new("a"), 0);
        view.insert(ItemRecord::new("b"), 1);
        view.settle();
        assert!(view.has_changes());
        view.settle();
        assert!(!view.has_changes());
        view.settle();
        assert_eq!(view.pending_changes(), 0);
    }

    #[test]
    fn test_insert_after_maximum_priority_does_not_overflow() {
        let mut view = CollectionView::prepared();
        let snapshot = DataSnapshot::new(
            Node::from_path("/items"),
            Some(json!({"a": {"__i": 0}, "z": {"__i": i64::MAX}})),
        );
        view.apply(&snapshot, DataEvent::Value).unwrap();

        view.insert(ItemRecord::new("y"), 2);
        assert_eq!(view.get(2).and_then(|item| item.priority), Some(i64::MAX));

        let shifted = view.insert(ItemRecord::new("b"), 1);
        assert_eq!(keys(&view)[..2], ["a", "b"]);
        assert!(shifted.iter().all(|s| s.record.priority == Some(i64::MAX)));
    }

    #[test]
    fn test_undo_insert_restores_priorities() {
        let mut view = CollectionView::prepared();
        view.insert(ItemRecord::new("a"), 0);
        view.insert(ItemRecord::new("b"), 1);
        let shifted = view.insert(ItemRecord::new("x"), 0);

        view.undo_insert("x", &shifted);
        assert_eq!(keys(&view), vec!["a", "b"]);
        assert_eq!(priorities(&view), vec![0, 1]);
    }

    #[test]
    fn test_apply_full_snapshot_sorts() {
        let mut view = CollectionView::new();
        let snapshot = DataSnapshot::new(
            Node::from_path("/items"),
            Some(json!({"b": {"__i": 1}, "a": {"__i": 2}, "c": {"__i": 0}})),
        );

        let change = view.apply(&snapshot, DataEvent::Value).unwrap();
        assert_eq!(change, ViewChange::Initial);
        assert_eq!(keys(&view), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_apply_child_events() {
        let mut view = CollectionView::prepared();
        let items = Node::from_path("/items");
        view.apply(
            &DataSnapshot::new(items.clone(), Some(json!({"a": {"__i": 0}, "b": {"__i": 1}}))),
            DataEvent::Value,
        )
        .unwrap();

        let change = view
            .apply(
                &DataSnapshot::new(items.child("c"), Some(json!({"__i": 5}))),
                DataEvent::ChildAdded,
            )
            .unwrap();
        assert_eq!(change, ViewChange::inserted(2));

        // Priority change moves the record
        let change = view
            .apply(
                &DataSnapshot::new(items.child("a"), Some(json!({"__i": 9}))),
                DataEvent::ChildChanged,
            )
            .unwrap();
        assert_eq!(change, ViewChange::relocated(0, 2));
        assert_eq!(keys(&view), vec!["b", "c", "a"]);

        let change = view
            .apply(
                &DataSnapshot::new(items.child("c"), Some(json!({"__i": 5}))),
                DataEvent::ChildRemoved,
            )
            .unwrap();
        assert_eq!(change, ViewChange::deleted(1));
        assert_eq!(keys(&view), vec!["b", "a"]);

        let change = view
            .apply(&DataSnapshot::new(items.child("zz"), None), DataEvent::ChildRemoved)
            .unwrap();
        assert!(change.is_empty());
    }

    #[test]
    fn test_apply_rejects_malformed_records() {
        let mut view = CollectionView::new();
        let snapshot = DataSnapshot::new(
            Node::from_path("/items"),
            Some(json!({"a": {"__i": "first"}})),
        );
        assert!(view.apply(&snapshot, DataEvent::Value).is_err());
        assert!(view.is_empty());
    }
}

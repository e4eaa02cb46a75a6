//! Item reconciliation for a single shared list.
//!
//! [`ItemReconciler`] keeps the newest-first item collection for one list
//! consistent across three inputs: the REST snapshot, local optimistic
//! mutations, and inbound channel events from other collaborators. All
//! transitions are idempotent, so an echoed event arriving after the local
//! mutation it mirrors (or a duplicate delivery) is a no-op.

use std::collections::HashSet;

use crate::events::ItemEvent;
use crate::models::TodoItem;
use crate::types::DbId;

/// Ordered, id-unique item collection for one list.
#[derive(Debug, Clone, Default)]
pub struct ItemReconciler {
    list_id: DbId,
    items: Vec<TodoItem>,
}

impl ItemReconciler {
    pub fn new(list_id: DbId) -> Self {
        Self {
            list_id,
            items: Vec::new(),
        }
    }

    pub fn list_id(&self) -> DbId {
        self.list_id
    }

    /// Replace the collection with a freshly fetched snapshot.
    ///
    /// Snapshot order is kept. If the server repeats an id, the first
    /// occurrence wins.
    pub fn load_snapshot(&mut self, snapshot: Vec<TodoItem>) {
        let mut seen = HashSet::with_capacity(snapshot.len());
        let before = snapshot.len();
        self.items = snapshot
            .into_iter()
            .filter(|item| seen.insert(item.id))
            .collect();

        if self.items.len() != before {
            tracing::warn!(
                list_id = self.list_id,
                dropped = before - self.items.len(),
                "Snapshot contained duplicate item ids",
            );
        }
    }

    /// Apply one transition. Returns `true` when the collection changed.
    pub fn apply(&mut self, event: ItemEvent) -> bool {
        match event {
            ItemEvent::Created(item) => {
                if self.position(item.id).is_some() {
                    return false;
                }
                self.items.insert(0, item);
                true
            }
            ItemEvent::Updated(patch) => match self.position(patch.id) {
                Some(idx) => patch.merge_into(&mut self.items[idx]),
                None => false,
            },
            ItemEvent::Completed { id, completed } => match self.position(id) {
                Some(idx) if self.items[idx].completed != completed => {
                    self.items[idx].completed = completed;
                    true
                }
                _ => false,
            },
            ItemEvent::Deleted { id } => match self.position(id) {
                Some(idx) => {
                    self.items.remove(idx);
                    true
                }
                None => false,
            },
        }
    }

    pub fn items(&self) -> &[TodoItem] {
        &self.items
    }

    pub fn get(&self, id: DbId) -> Option<&TodoItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.items.iter().filter(|item| item.completed).count()
    }

    fn position(&self, id: DbId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemPatch;
    use crate::normalize::extract_items;
    use serde_json::json;

    fn item(id: DbId, description: &str, completed: bool) -> TodoItem {
        serde_json::from_value(json!({
            "id": id,
            "description": description,
            "completed": completed,
        }))
        .unwrap()
    }

    fn ids(r: &ItemReconciler) -> Vec<DbId> {
        r.items().iter().map(|i| i.id).collect()
    }

    fn seeded() -> ItemReconciler {
        let mut r = ItemReconciler::new(1);
        r.load_snapshot(vec![item(3, "c", false), item(2, "b", true), item(1, "a", false)]);
        r
    }

    #[test]
    fn created_prepends_newest_first() {
        let mut r = seeded();
        assert!(r.apply(ItemEvent::Created(item(4, "d", false))));
        assert_eq!(ids(&r), vec![4, 3, 2, 1]);
    }

    #[test]
    fn created_for_existing_id_is_noop() {
        let mut r = seeded();
        let before = r.items().to_vec();
        assert!(!r.apply(ItemEvent::Created(item(2, "different", false))));
        assert_eq!(r.items(), before.as_slice());
    }

    #[test]
    fn two_rapid_creates_with_same_id_keep_one() {
        let mut r = ItemReconciler::new(1);
        r.apply(ItemEvent::Created(item(5, "x", false)));
        r.apply(ItemEvent::Created(item(5, "x", false)));
        assert_eq!(ids(&r), vec![5]);
    }

    #[test]
    fn deleted_for_missing_id_is_noop() {
        let mut r = seeded();
        assert!(!r.apply(ItemEvent::Deleted { id: 99 }));
        assert_eq!(ids(&r), vec![3, 2, 1]);
    }

    #[test]
    fn deleted_removes_entry() {
        let mut r = seeded();
        assert!(r.apply(ItemEvent::Deleted { id: 2 }));
        assert_eq!(ids(&r), vec![3, 1]);
    }

    #[test]
    fn updated_merges_shallowly() {
        let mut r = seeded();
        let patch: ItemPatch = serde_json::from_value(json!({"id": 3, "title": "T"})).unwrap();
        assert!(r.apply(ItemEvent::Updated(patch)));
        let updated = r.get(3).unwrap();
        assert_eq!(updated.title.as_deref(), Some("T"));
        assert_eq!(updated.description.as_deref(), Some("c"));
    }

    #[test]
    fn updated_for_missing_id_is_noop() {
        let mut r = seeded();
        let patch = ItemPatch {
            id: 42,
            title: Some("nope".into()),
            ..Default::default()
        };
        assert!(!r.apply(ItemEvent::Updated(patch)));
        assert!(r.get(42).is_none());
    }

    #[test]
    fn completed_touches_only_the_flag() {
        let mut r = ItemReconciler::new(1);
        r.load_snapshot(extract_items(&json!([
            {"id": 1, "description": "a", "completed": false}
        ])));

        assert!(r.apply(ItemEvent::Completed { id: 1, completed: true }));
        assert_eq!(r.len(), 1);
        let only = r.get(1).unwrap();
        assert!(only.completed);
        assert_eq!(only.description.as_deref(), Some("a"));
    }

    #[test]
    fn local_mutation_then_echo_equals_local_alone() {
        let transitions = vec![
            ItemEvent::Created(item(9, "new", false)),
            ItemEvent::Updated(ItemPatch::from(item(2, "b2", false))),
            ItemEvent::Completed { id: 1, completed: true },
            ItemEvent::Deleted { id: 3 },
        ];

        for transition in transitions {
            let mut local_only = seeded();
            local_only.apply(transition.clone());

            let mut with_echo = seeded();
            with_echo.apply(transition.clone());
            assert!(!with_echo.apply(transition.clone()), "echo of {transition:?} changed state");

            assert_eq!(local_only.items(), with_echo.items());
        }
    }

    #[test]
    fn snapshot_drops_duplicate_ids() {
        let mut r = ItemReconciler::new(1);
        r.load_snapshot(vec![item(1, "first", false), item(1, "second", true)]);
        assert_eq!(r.len(), 1);
        assert_eq!(r.get(1).unwrap().description.as_deref(), Some("first"));
    }

    #[test]
    fn completed_count_tracks_flags() {
        let mut r = seeded();
        assert_eq!(r.completed_count(), 1);
        r.apply(ItemEvent::Completed { id: 3, completed: true });
        assert_eq!(r.completed_count(), 2);
    }
}

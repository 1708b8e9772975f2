//! Highlight table: at most one record per entity, last writer wins.
//!
//! With multi-highlight disabled a participant holds at most one highlight;
//! activating a new one clears that participant's previous highlight first.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::entity::EntityReference;
use crate::room::HighlightRecord;

#[derive(Debug, Clone, Default)]
pub struct HighlightTable {
    records: BTreeMap<EntityReference, HighlightRecord>,
}

impl HighlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_highlighted(&self, entity: &EntityReference) -> bool {
        self.records
            .get(&entity.normalized())
            .is_some_and(|r| r.is_highlighted)
    }

    pub fn get(&self, entity: &EntityReference) -> Option<&HighlightRecord> {
        self.records.get(&entity.normalized())
    }

    /// Insert `record`, replacing any record for the same entity.
    ///
    /// Returns the entities that were cleared to keep the single-highlight
    /// invariant for `record.user_id`.
    pub fn highlight(&mut self, record: HighlightRecord, multi_highlight: bool) -> Vec<EntityReference> {
        let key = record.reference();
        let mut cleared = Vec::new();
        if !multi_highlight {
            cleared = self
                .records
                .iter()
                .filter(|(k, r)| r.user_id == record.user_id && **k != key)
                .map(|(k, _)| k.clone())
                .collect();
            for k in &cleared {
                self.records.remove(k);
            }
        }
        self.records.insert(key, HighlightRecord { is_highlighted: true, ..record });
        cleared
    }

    pub fn unhighlight(&mut self, entity: &EntityReference) -> Option<HighlightRecord> {
        self.records.remove(&entity.normalized())
    }

    /// Drop every highlight held by `user_id`.
    pub fn clear_user(&mut self, user_id: Uuid) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.user_id != user_id);
        before - self.records.len()
    }

    /// Drop every highlight inside application `app_id`.
    pub fn clear_app(&mut self, app_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|k, _| k.app_id.as_deref() != Some(app_id));
        before - self.records.len()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.records.len();
        self.records.clear();
        n
    }

    pub fn records_for_app(&self, app_id: &str) -> Vec<HighlightRecord> {
        self.records
            .iter()
            .filter(|(k, _)| k.app_id.as_deref() == Some(app_id))
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Highlights on inter-application communication links.
    pub fn extern_records(&self) -> Vec<HighlightRecord> {
        self.records
            .iter()
            .filter(|(k, _)| k.app_id.is_none())
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn records_of(&self, user_id: Uuid) -> Vec<&HighlightRecord> {
        self.records.values().filter(|r| r.user_id == user_id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HighlightRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::entity::EntityType;

    fn rec(app: &str, id: &str, user: Uuid) -> HighlightRecord {
        HighlightRecord::new(
            &EntityReference::in_app(app, EntityType::Clazz, id),
            user,
            Color::default(),
        )
    }

    #[test]
    fn test_single_highlight_replaces_previous() {
        let user = Uuid::new_v4();
        let mut table = HighlightTable::new();
        table.highlight(rec("a", "e1", user), false);
        let cleared = table.highlight(rec("a", "e2", user), false);

        assert_eq!(cleared, vec![EntityReference::in_app("a", EntityType::Clazz, "e1")]);
        assert!(!table.is_highlighted(&EntityReference::in_app("a", EntityType::Clazz, "e1")));
        assert!(table.is_highlighted(&EntityReference::in_app("a", EntityType::Clazz, "e2")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_multi_highlight_keeps_previous() {
        let user = Uuid::new_v4();
        let mut table = HighlightTable::new();
        table.highlight(rec("a", "e1", user), true);
        table.highlight(rec("b", "e2", user), true);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_other_users_unaffected() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut table = HighlightTable::new();
        table.highlight(rec("a", "e1", alice), false);
        table.highlight(rec("a", "e2", bob), false);
        assert_eq!(table.len(), 2);
        assert_eq!(table.clear_user(alice), 1);
        assert_eq!(table.records_of(bob).len(), 1);
    }

    #[test]
    fn test_same_entity_last_writer_wins() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut table = HighlightTable::new();
        table.highlight(rec("a", "e1", alice), false);
        table.highlight(rec("a", "e1", bob), false);
        let key = EntityReference::in_app("a", EntityType::Clazz, "e1");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&key).map(|r| r.user_id), Some(bob));
    }

    #[test]
    fn test_partition_by_app_and_links() {
        let user = Uuid::new_v4();
        let mut table = HighlightTable::new();
        table.highlight(rec("a", "e1", user), true);
        table.highlight(
            HighlightRecord::new(&EntityReference::extern_link("l1"), user, Color::default()),
            true,
        );
        assert_eq!(table.records_for_app("a").len(), 1);
        assert_eq!(table.extern_records().len(), 1);
        assert_eq!(table.clear_app("a"), 1);
        assert_eq!(table.len(), 1);
    }
}

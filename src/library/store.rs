use std::collections::HashSet;

use super::error::LibraryError;
use crate::domain::{EpisodeId, FolderId};
use crate::models::EpisodeRecord;

/// The record list one view renders, plus its current selection.
///
/// Record order follows the last listing. The selection only ever holds ids
/// that are present in `records`.
#[derive(Debug, Clone)]
pub struct EpisodeStore {
    folder_id: FolderId,
    records: Vec<EpisodeRecord>,
    selection: HashSet<EpisodeId>,
}

impl EpisodeStore {
    #[must_use]
    pub fn new(folder_id: FolderId) -> Self {
        Self {
            folder_id,
            records: Vec::new(),
            selection: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn folder_id(&self) -> &FolderId {
        &self.folder_id
    }

    #[must_use]
    pub fn records(&self) -> &[EpisodeRecord] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut Vec<EpisodeRecord> {
        &mut self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Swaps in a new listing. Selected ids that disappeared are dropped.
    pub fn replace(&mut self, records: Vec<EpisodeRecord>) {
        self.records = records;
        let present: HashSet<&EpisodeId> = self.records.iter().map(EpisodeRecord::id).collect();
        self.selection.retain(|id| present.contains(id));
    }

    #[must_use]
    pub fn get(&self, id: &EpisodeId) -> Option<&EpisodeRecord> {
        self.records.iter().find(|record| record.id() == id)
    }

    #[must_use]
    pub fn contains(&self, id: &EpisodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn rename(&mut self, id: &EpisodeId, name: String) -> Result<(), LibraryError> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.id() == id)
            .ok_or_else(|| LibraryError::NotFound(id.clone()))?;
        record.set_name(name);
        Ok(())
    }

    /// Drops the given ids from both the records and the selection.
    /// Returns how many records were removed.
    pub fn remove(&mut self, ids: &HashSet<EpisodeId>) -> usize {
        let before = self.records.len();
        self.records.retain(|record| !ids.contains(record.id()));
        self.selection.retain(|id| !ids.contains(id));
        before - self.records.len()
    }

    /// Returns false when the id is not in the list.
    pub fn select(&mut self, id: &EpisodeId) -> bool {
        if self.contains(id) {
            self.selection.insert(id.clone());
            true
        } else {
            false
        }
    }

    pub fn deselect(&mut self, id: &EpisodeId) -> bool {
        self.selection.remove(id)
    }

    pub fn toggle(&mut self, id: &EpisodeId) -> bool {
        if self.selection.contains(id) {
            self.selection.remove(id);
            false
        } else {
            self.select(id)
        }
    }

    pub fn select_all(&mut self) {
        self.selection = self.records.iter().map(|r| r.id().clone()).collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    #[must_use]
    pub fn is_selected(&self, id: &EpisodeId) -> bool {
        self.selection.contains(id)
    }

    /// Selected ids in display order.
    #[must_use]
    pub fn selected_ids(&self) -> Vec<EpisodeId> {
        self.records
            .iter()
            .filter(|record| self.selection.contains(record.id()))
            .map(|record| record.id().clone())
            .collect()
    }

    #[must_use]
    pub fn video_ids(&self) -> Vec<EpisodeId> {
        self.records
            .iter()
            .filter(|record| record.is_video())
            .map(|record| record.id().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EpisodeStore {
        let mut store = EpisodeStore::new(FolderId::from("f"));
        store.replace(vec![
            EpisodeRecord::new("a", "a.mkv", true),
            EpisodeRecord::new("b", "b.ass", false),
            EpisodeRecord::new("c", "c.mp4", true),
        ]);
        store
    }

    fn ids(values: &[&str]) -> HashSet<EpisodeId> {
        values.iter().map(|v| EpisodeId::from(*v)).collect()
    }

    #[test]
    fn selection_only_accepts_present_ids() {
        let mut store = store();
        assert!(store.select(&EpisodeId::from("a")));
        assert!(!store.select(&EpisodeId::from("zz")));
        assert_eq!(store.selected_ids(), vec![EpisodeId::from("a")]);
    }

    #[test]
    fn selected_ids_follow_display_order() {
        let mut store = store();
        store.select(&EpisodeId::from("c"));
        store.select(&EpisodeId::from("a"));
        assert_eq!(
            store.selected_ids(),
            vec![EpisodeId::from("a"), EpisodeId::from("c")]
        );
    }

    #[test]
    fn replace_prunes_selection() {
        let mut store = store();
        store.select_all();
        store.replace(vec![EpisodeRecord::new("b", "b.ass", false)]);
        assert_eq!(store.selected_ids(), vec![EpisodeId::from("b")]);
        assert!(!store.is_selected(&EpisodeId::from("a")));
    }

    #[test]
    fn remove_drops_records_and_selection() {
        let mut store = store();
        store.select_all();
        let removed = store.remove(&ids(&["a", "c", "missing"]));
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.selected_ids(), vec![EpisodeId::from("b")]);
    }

    #[test]
    fn rename_missing_is_not_found() {
        let mut store = store();
        store.rename(&EpisodeId::from("a"), "x.mkv".to_string()).unwrap();
        assert_eq!(store.get(&EpisodeId::from("a")).unwrap().name(), "x.mkv");

        let err = store
            .rename(&EpisodeId::from("zz"), "y.mkv".to_string())
            .unwrap_err();
        assert_eq!(err, LibraryError::NotFound(EpisodeId::from("zz")));
    }

    #[test]
    fn toggle_and_video_ids() {
        let mut store = store();
        assert!(store.toggle(&EpisodeId::from("b")));
        assert!(!store.toggle(&EpisodeId::from("b")));
        assert_eq!(
            store.video_ids(),
            vec![EpisodeId::from("a"), EpisodeId::from("c")]
        );
    }
}

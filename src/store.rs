//! Working copy and baseline of an account's checklists.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dirty;
use crate::types::{Checklist, ChecklistId, Item, ItemId};

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StoreError {
    #[error("no checklist with id {0}")]
    UnknownChecklist(ChecklistId),
    #[error("no item with id {0} in the active checklist")]
    UnknownItem(ItemId),
    #[error("no checklist is selected")]
    NoActiveChecklist,
}

impl StoreError {
    /// Both unknown-id cases are the "invalid reference" class of errors.
    pub fn is_invalid_reference(&self) -> bool {
        matches!(self, StoreError::UnknownChecklist(_) | StoreError::UnknownItem(_))
    }
}

/// All checklists of one account, in the order the server returned them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct Collection {
    checklists: Vec<Checklist>,
}

impl Collection {
    /// Builds a collection, dropping later duplicates of a checklist id and,
    /// within each checklist, of an item id.
    pub fn new(checklists: Vec<Checklist>) -> Self {
        let mut seen_lists = HashSet::new();
        let mut unique: Vec<Checklist> = Vec::with_capacity(checklists.len());
        for mut checklist in checklists {
            if !seen_lists.insert(checklist.id.clone()) {
                debug!(checklist_id = %checklist.id, "dropping duplicate checklist id");
                continue;
            }
            let mut seen_items = HashSet::new();
            checklist
                .items
                .retain(|item| seen_items.insert(item.id.clone()));
            unique.push(checklist);
        }
        Self { checklists: unique }
    }

    pub fn checklists(&self) -> &[Checklist] {
        &self.checklists
    }

    pub fn get(&self, id: &ChecklistId) -> Option<&Checklist> {
        self.checklists.iter().find(|checklist| &checklist.id == id)
    }

    pub fn get_mut(&mut self, id: &ChecklistId) -> Option<&mut Checklist> {
        self.checklists.iter_mut().find(|checklist| &checklist.id == id)
    }

    pub fn contains(&self, id: &ChecklistId) -> bool {
        self.get(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.checklists.is_empty()
    }

    pub fn len(&self) -> usize {
        self.checklists.len()
    }

    fn upsert(&mut self, checklist: Checklist) {
        match self.get_mut(&checklist.id) {
            Some(existing) => *existing = checklist,
            None => self.checklists.push(checklist),
        }
    }

    fn remove(&mut self, id: &ChecklistId) -> bool {
        let before = self.checklists.len();
        self.checklists.retain(|checklist| &checklist.id != id);
        self.checklists.len() != before
    }

    pub fn into_checklists(self) -> Vec<Checklist> {
        self.checklists
    }
}

/// One item as last saved and as edited locally.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PendingEdit {
    pub saved: Item,
    pub edited: Item,
}

/// The optimistic `current` copy plus the `baseline` it is compared against.
///
/// `baseline` is replaced only by [`ChecklistStore::set_active_checklist`],
/// [`ChecklistStore::replace_collection`] and [`ChecklistStore::rebaseline`];
/// edits go to `current` alone. [`ChecklistStore::apply_confirmed`] is for
/// changes the remote has already accepted and touches both.
#[derive(Debug, Clone, Default)]
pub struct ChecklistStore {
    current: Collection,
    baseline: Collection,
    active: Option<ChecklistId>,
}

impl ChecklistStore {
    pub fn new(collection: Collection) -> Self {
        Self {
            baseline: collection.clone(),
            current: collection,
            active: None,
        }
    }

    pub fn current(&self) -> &Collection {
        &self.current
    }

    pub fn baseline(&self) -> &Collection {
        &self.baseline
    }

    pub fn active_id(&self) -> Option<&ChecklistId> {
        self.active.as_ref()
    }

    pub fn active_checklist(&self) -> Option<&Checklist> {
        self.active.as_ref().and_then(|id| self.current.get(id))
    }

    pub fn active_baseline(&self) -> Option<&Checklist> {
        self.active.as_ref().and_then(|id| self.baseline.get(id))
    }

    pub fn set_active_checklist(&mut self, id: &ChecklistId) -> Result<(), StoreError> {
        if !self.current.contains(id) {
            return Err(StoreError::UnknownChecklist(id.clone()));
        }
        self.active = Some(id.clone());
        self.rebaseline();
        debug!(checklist_id = %id, "active checklist set");
        Ok(())
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Applies `f` to the active checklist's items in the working copy only.
    pub fn mutate_active_items<T>(
        &mut self,
        f: impl FnOnce(&mut Vec<Item>) -> T,
    ) -> Result<T, StoreError> {
        let id = self.active.clone().ok_or(StoreError::NoActiveChecklist)?;
        let checklist = self
            .current
            .get_mut(&id)
            .ok_or(StoreError::UnknownChecklist(id))?;
        Ok(f(&mut checklist.items))
    }

    /// Swaps in a freshly fetched collection. The active selection survives
    /// (and is re-baselined) only if its id is still present.
    pub fn replace_collection(&mut self, collection: Collection) {
        self.current = collection;
        match self.active.clone() {
            Some(id) if self.current.contains(&id) => self.rebaseline(),
            Some(id) => {
                debug!(checklist_id = %id, "active checklist vanished from fetched collection");
                self.active = None;
                self.rebaseline();
            }
            None => self.rebaseline(),
        }
    }

    /// Re-captures the baseline as a deep copy of the working copy.
    pub fn rebaseline(&mut self) {
        self.baseline = self.current.clone();
    }

    /// Applies an already-persisted change to both copies.
    pub fn apply_confirmed(&mut self, f: impl Fn(&mut Collection)) {
        f(&mut self.current);
        f(&mut self.baseline);
    }

    pub fn upsert_confirmed(&mut self, checklist: Checklist) {
        self.apply_confirmed(|collection| collection.upsert(checklist.clone()));
    }

    pub fn remove_confirmed(&mut self, id: &ChecklistId) -> bool {
        let removed = self.current.remove(id);
        self.baseline.remove(id);
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        removed
    }

    /// Every item of one checklist whose working copy differs from its
    /// baseline, paired with the baseline version.
    pub fn pending_edits(&self, checklist_id: &ChecklistId) -> Vec<PendingEdit> {
        let (Some(current), Some(baseline)) =
            (self.current.get(checklist_id), self.baseline.get(checklist_id))
        else {
            return Vec::new();
        };
        dirty::changed_items(current, baseline)
            .iter()
            .filter_map(|item_id| {
                Some(PendingEdit {
                    saved: baseline.item(item_id)?.clone(),
                    edited: current.item(item_id)?.clone(),
                })
            })
            .collect()
    }

    /// Puts edits that never reached the remote back on top of a freshly
    /// captured baseline, so the checklist reads as unsaved again. Returns how
    /// many of the edited items still exist.
    pub fn reapply_edits(&mut self, checklist_id: &ChecklistId, edits: &[PendingEdit]) -> usize {
        let mut applied = 0;
        for edit in edits {
            let current = self
                .current
                .get_mut(checklist_id)
                .and_then(|checklist| checklist.item_mut(&edit.edited.id));
            let Some(current) = current else {
                continue;
            };
            current.name.clone_from(&edit.edited.name);
            current.status = edit.edited.status;
            if let Some(baseline) = self
                .baseline
                .get_mut(checklist_id)
                .and_then(|checklist| checklist.item_mut(&edit.saved.id))
            {
                *baseline = edit.saved.clone();
            }
            applied += 1;
        }
        applied
    }

    pub fn is_dirty(&self) -> bool {
        dirty::is_dirty(self.active_checklist(), self.active_baseline())
    }
}

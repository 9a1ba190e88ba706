//! Divergence between the working copy and the baseline of the active checklist.
//!
//! Items are matched by id, so reordering alone never counts as a change and
//! a delete-plus-add of the same length is still detected.

use crate::types::{Checklist, ItemId};

/// True when `current` differs from `baseline` in item count, or when any
/// item's name or status differs from the baseline item with the same id.
///
/// Either side missing means there is nothing to compare.
pub fn is_dirty(current: Option<&Checklist>, baseline: Option<&Checklist>) -> bool {
    let (Some(current), Some(baseline)) = (current, baseline) else {
        return false;
    };

    if current.items.len() != baseline.items.len() {
        return true;
    }

    !changed_items(current, baseline).is_empty()
}

/// Ids of working-copy items that are new or differ from their baseline.
pub fn changed_items(current: &Checklist, baseline: &Checklist) -> Vec<ItemId> {
    current
        .items
        .iter()
        .filter(|item| match baseline.item(&item.id) {
            Some(original) => original.status != item.status || original.name != item.name,
            None => true,
        })
        .map(|item| item.id.clone())
        .collect()
}

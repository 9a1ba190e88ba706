//! Packing progress and the status-ordered display view.

use crate::types::{Checklist, Item};

/// Percentage of packed items, rounded half up. Empty lists report 0.
pub fn checklist_progress(checklist: &Checklist) -> u8 {
    percent(checklist.packed_count(), checklist.items.len())
}

/// Packed percentage across every item of every checklist.
pub fn aggregate_progress<'a>(checklists: impl IntoIterator<Item = &'a Checklist>) -> u8 {
    let (packed, total) = checklists
        .into_iter()
        .fold((0usize, 0usize), |(packed, total), checklist| {
            (packed + checklist.packed_count(), total + checklist.items.len())
        });
    percent(packed, total)
}

fn percent(part: usize, whole: usize) -> u8 {
    if whole == 0 {
        return 0;
    }
    let rounded = (200 * part + whole) / (2 * whole);
    u8::try_from(rounded.min(100)).unwrap_or(100)
}

/// Items ordered by status rank, ties keep insertion order.
///
/// Presentation only: the checklist's own order is left untouched.
pub fn display_order(items: &[Item]) -> Vec<&Item> {
    let mut ordered: Vec<&Item> = items.iter().collect();
    ordered.sort_by_key(|item| item.status.rank());
    ordered
}

//! Decides when local checklist edits are pushed to the remote service.
//!
//! Status taps stay local until a flush trigger: switching lists, creating a
//! list, an explicit save, unload or teardown. Renames, adds and deletes go to
//! the remote immediately and are applied to both copies once accepted.

mod errors;
mod flush;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::remote::{ChecklistRemote, ItemUpdate};
use crate::store::{ChecklistStore, Collection, PendingEdit, StoreError};
use crate::types::{Checklist, ChecklistId, Credential, Item, ItemId, ItemStatus};

pub use errors::{Notice, SyncError, notice_for};
pub use flush::{FailedItem, FlushPlan, FlushReport};

/// Credential plus the checklist state it unlocks, handed to the controller
/// explicitly.
#[derive(Debug, Default)]
pub struct Session {
    credential: Option<Credential>,
    store: ChecklistStore,
}

impl Session {
    pub fn new(credential: Option<Credential>, store: ChecklistStore) -> Self {
        Self { credential, store }
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn store(&self) -> &ChecklistStore {
        &self.store
    }
}

/// Observable sync state for whatever renders the lists.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SyncStatus {
    pub active: Option<ChecklistId>,
    pub dirty: bool,
    pub switching: bool,
    pub flushing: bool,
    pub last_error: Option<String>,
}

/// What a completed hold gesture opens the rename/delete prompt for.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EditTarget {
    Item(ItemId),
    Checklist(ChecklistId),
}

/// Result of the flush a trigger ran before doing its real work.
#[derive(Debug)]
pub enum FlushSummary {
    NotNeeded,
    Saved(FlushReport),
    Failed(SyncError),
}

impl FlushSummary {
    pub fn is_failure(&self) -> bool {
        matches!(self, FlushSummary::Failed(_))
    }
}

#[derive(Debug)]
pub enum SwitchOutcome {
    AlreadyActive,
    Switched {
        previous: Option<ChecklistId>,
        flush: FlushSummary,
    },
}

#[derive(Debug)]
pub struct CreateOutcome {
    pub id: ChecklistId,
    pub flush: FlushSummary,
}

#[derive(Debug)]
pub enum UnloadDecision {
    Proceed,
    /// Ask the host to delay closing; the flush is already running.
    Defer(JoinHandle<FlushReport>),
}

pub struct SyncController<R> {
    session: Session,
    remote: Arc<R>,
    cache: Option<LocalCache>,
    status: watch::Sender<SyncStatus>,
    switching: bool,
    flushing: bool,
    last_error: Option<String>,
    /// Unsaved edits of lists that are not open, captured when a list is
    /// left dirty, so reopening it shows them as unsaved again instead of
    /// absorbing them into the baseline.
    unsaved: HashMap<ChecklistId, Vec<PendingEdit>>,
}

impl<R: ChecklistRemote> SyncController<R> {
    pub fn new(session: Session, remote: Arc<R>, cache: Option<LocalCache>) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        let controller = Self {
            session,
            remote,
            cache,
            status,
            switching: false,
            flushing: false,
            last_error: None,
            unsaved: HashMap::new(),
        };
        controller.publish();
        controller
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &ChecklistStore {
        &self.session.store
    }

    pub fn is_dirty(&self) -> bool {
        self.session.store.is_dirty()
    }

    /// Startup: render from the local cache, then refresh from the remote
    /// when a credential is available.
    pub async fn mount(&mut self) -> Result<(), SyncError> {
        self.load_cached();
        if self.session.credential.is_none() {
            debug!("no credential; staying on cached checklists");
            return Ok(());
        }
        let result = self.reload().await;
        if let Err(err) = &result {
            warn!(error = %err, "initial checklist fetch failed; using cached copy");
            self.record_error(err);
        }
        result
    }

    /// Loads the cached collection and returns how many checklists it held.
    pub fn load_cached(&mut self) -> usize {
        let Some(cache) = self.cache.as_ref() else {
            return 0;
        };
        let (collection, active) = cache.load_collection();
        let count = collection.len();
        self.session.store.replace_collection(collection);
        if let Some(active) = active
            && self.session.store.set_active_checklist(&active).is_err()
        {
            debug!(checklist_id = %active, "cached active checklist no longer exists");
        }
        self.publish();
        count
    }

    /// Saves pending edits, then re-fetches everything.
    pub async fn refresh(&mut self) -> Result<(), SyncError> {
        if self.is_dirty() {
            self.flush_active().await?;
            return Ok(());
        }
        self.reload().await
    }

    pub async fn switch_to(&mut self, id: &ChecklistId) -> Result<SwitchOutcome, SyncError> {
        if self.session.store.active_id() == Some(id) {
            return Ok(SwitchOutcome::AlreadyActive);
        }
        if !self.session.store.current().contains(id) {
            return Err(StoreError::UnknownChecklist(id.clone()).into());
        }

        let previous = self.session.store.active_id().cloned();
        self.switching = true;
        self.publish();

        // The outgoing list must be fully flushed before the re-baseline below,
        // or its edits drop out of every later comparison.
        let flush = self.flush_if_dirty().await;
        if let FlushSummary::Failed(err) = &flush {
            warn!(error = %err, target = %id, "switching lists with unsaved changes");
        }
        if let Some(previous) = &previous {
            self.capture_unsaved(previous);
        }

        let result = self.session.store.set_active_checklist(id);
        self.switching = false;
        if result.is_ok() {
            self.restore_unsaved(id);
            info!(from = ?previous.as_ref().map(ChecklistId::as_str), to = %id, "switched checklist");
            self.mirror_cache();
        }
        self.publish();
        result?;

        Ok(SwitchOutcome::Switched { previous, flush })
    }

    pub async fn create_checklist(&mut self, name: &str) -> Result<CreateOutcome, SyncError> {
        let name = non_empty(name)?;
        let credential = self.credential()?;

        let flush = self.flush_if_dirty().await;
        if let Some(previous) = self.session.store.active_id().cloned() {
            self.capture_unsaved(&previous);
        }

        let id = self
            .remote
            .create_checklist(&credential, name)
            .await?;
        info!(checklist_id = %id, "created checklist");

        // A failed flush leaves edits only in the working copy; a wholesale
        // replace would discard them.
        if !flush.is_failure() {
            match self.fetch_collection(&credential).await {
                Ok(collection) => self.session.store.replace_collection(collection),
                Err(err) => warn!(error = %err, "refetch after create failed"),
            }
        }
        if !self.session.store.current().contains(&id) {
            self.session
                .store
                .upsert_confirmed(Checklist::new(id.clone(), name));
        }

        self.session.store.set_active_checklist(&id)?;
        self.mirror_cache();
        self.publish();
        Ok(CreateOutcome { id, flush })
    }

    pub async fn rename_checklist(&mut self, id: &ChecklistId, name: &str) -> Result<(), SyncError> {
        let name = non_empty(name)?;
        if !self.session.store.current().contains(id) {
            return Err(StoreError::UnknownChecklist(id.clone()).into());
        }
        let credential = self.credential()?;

        self.remote.rename_checklist(&credential, id, name).await?;
        self.session.store.apply_confirmed(|collection| {
            if let Some(checklist) = collection.get_mut(id) {
                checklist.name = name.to_string();
            }
        });
        self.mirror_cache();
        self.publish();
        Ok(())
    }

    pub async fn delete_checklist(&mut self, id: &ChecklistId) -> Result<(), SyncError> {
        if !self.session.store.current().contains(id) {
            return Err(StoreError::UnknownChecklist(id.clone()).into());
        }
        let credential = self.credential()?;

        self.remote.delete_checklist(&credential, id).await?;
        self.session.store.remove_confirmed(id);
        self.unsaved.remove(id);
        info!(checklist_id = %id, "deleted checklist");
        self.mirror_cache();
        self.publish();
        Ok(())
    }

    /// Advances one item of the active checklist a single status step.
    pub fn tap_item(&mut self, item_id: &ItemId) -> Result<ItemStatus, SyncError> {
        let status = self
            .session
            .store
            .mutate_active_items(|items| {
                items.iter_mut().find(|item| &item.id == item_id).map(|item| {
                    item.status = item.status.next();
                    item.status
                })
            })?
            .ok_or_else(|| StoreError::UnknownItem(item_id.clone()))?;
        debug!(%item_id, status = status.as_str(), "item tapped");
        self.publish();
        Ok(status)
    }

    pub async fn add_item(&mut self, name: &str) -> Result<ItemId, SyncError> {
        let name = non_empty(name)?;
        let checklist_id = self.active_id()?;
        let credential = self.credential()?;

        let item_id = self
            .remote
            .create_item(&credential, name, ItemStatus::NotReady, &checklist_id)
            .await?;
        let item = Item::new(item_id.clone(), name);
        self.session.store.apply_confirmed(|collection| {
            if let Some(checklist) = collection.get_mut(&checklist_id)
                && checklist.item(&item.id).is_none()
            {
                checklist.items.push(item.clone());
            }
        });
        self.mirror_cache();
        self.publish();
        Ok(item_id)
    }

    /// Renames immediately. The status sent is the last saved one, so an
    /// unsaved tap is not persisted as a side effect.
    pub async fn rename_item(&mut self, item_id: &ItemId, name: &str) -> Result<(), SyncError> {
        let name = non_empty(name)?;
        let checklist_id = self.active_id()?;
        let status = self.saved_status(&checklist_id, item_id)?;
        let credential = self.credential()?;

        let update = ItemUpdate {
            name: name.to_string(),
            status,
        };
        self.remote.update_item(&credential, item_id, &update).await?;
        self.session.store.apply_confirmed(|collection| {
            if let Some(item) = collection
                .get_mut(&checklist_id)
                .and_then(|checklist| checklist.item_mut(item_id))
            {
                item.name = name.to_string();
            }
        });
        self.mirror_cache();
        self.publish();
        Ok(())
    }

    pub async fn delete_item(&mut self, item_id: &ItemId) -> Result<(), SyncError> {
        let checklist_id = self.active_id()?;
        self.saved_status(&checklist_id, item_id)?;
        let credential = self.credential()?;

        self.remote.delete_item(&credential, item_id).await?;
        self.session.store.apply_confirmed(|collection| {
            if let Some(checklist) = collection.get_mut(&checklist_id) {
                checklist.items.retain(|item| &item.id != item_id);
            }
        });
        self.mirror_cache();
        self.publish();
        Ok(())
    }

    /// Flushes the active checklist if it has unsaved edits.
    pub async fn save(&mut self) -> Result<Option<FlushReport>, SyncError> {
        if !self.is_dirty() {
            return Ok(None);
        }
        self.flush_active().await.map(Some)
    }

    /// Sends every item of the active checklist, then re-fetches and
    /// re-baselines. On any failure the baseline is left untouched, so the
    /// list stays dirty until a later flush succeeds in full.
    pub async fn flush_active(&mut self) -> Result<FlushReport, SyncError> {
        let credential = self.credential()?;
        let checklist = self
            .session
            .store
            .active_checklist()
            .ok_or(StoreError::NoActiveChecklist)?
            .clone();

        self.flushing = true;
        self.publish();
        let report = FlushPlan::for_checklist(credential.clone(), &checklist)
            .execute(Arc::clone(&self.remote))
            .await;
        self.flushing = false;

        if !report.is_success() {
            self.capture_unsaved(&checklist.id);
            let err = SyncError::FlushFailure(report);
            warn!(error = %err, checklist_id = %checklist.id, "flush failed; keeping unsaved state");
            self.record_error(&err);
            self.publish();
            return Err(err);
        }

        match self.fetch_collection(&credential).await {
            Ok(collection) => self.session.store.replace_collection(collection),
            Err(err) => {
                warn!(error = %err, "refetch after flush failed; re-baselining from local copy");
                self.session.store.rebaseline();
            }
        }
        self.unsaved.remove(&checklist.id);
        self.last_error = None;
        self.mirror_cache();
        self.publish();
        Ok(report)
    }

    /// Page-unload hook: with unsaved edits, starts a best-effort flush and
    /// asks the host to defer closing.
    pub fn on_unload(&mut self) -> UnloadDecision {
        match self.detached_flush() {
            Some(handle) => {
                info!("unload with unsaved changes; flush dispatched");
                UnloadDecision::Defer(handle)
            }
            None => UnloadDecision::Proceed,
        }
    }

    /// View teardown: fires a flush for unsaved edits without waiting on it.
    pub fn teardown(mut self) -> Option<JoinHandle<FlushReport>> {
        let handle = self.detached_flush();
        if handle.is_some() {
            info!("teardown with unsaved changes; flush dispatched");
        }
        handle
    }

    fn detached_flush(&mut self) -> Option<JoinHandle<FlushReport>> {
        if !self.is_dirty() {
            return None;
        }
        if self.unsaved.keys().any(|id| Some(id) != self.session.store.active_id()) {
            warn!(lists = self.unsaved.len(), "edits on inactive lists are still unsaved");
        }
        let Some(credential) = self.session.credential.clone() else {
            warn!("unsaved changes but no credential; nothing flushed");
            return None;
        };
        let checklist = self.session.store.active_checklist()?;
        let plan = FlushPlan::for_checklist(credential, checklist);
        Some(tokio::spawn(plan.execute(Arc::clone(&self.remote))))
    }

    /// Records the list's current divergence from its baseline, replacing
    /// whatever was captured for it before.
    fn capture_unsaved(&mut self, id: &ChecklistId) {
        let edits: Vec<PendingEdit> = self.session.store.pending_edits(id);
        if edits.is_empty() {
            self.unsaved.remove(id);
        } else {
            debug!(checklist_id = %id, edits = edits.len(), "keeping unsaved edits");
            self.unsaved.insert(id.clone(), edits);
        }
    }

    fn restore_unsaved(&mut self, id: &ChecklistId) {
        let Some(edits) = self.unsaved.get(id) else {
            return;
        };
        let restored = self.session.store.reapply_edits(id, edits);
        if restored > 0 {
            info!(checklist_id = %id, restored, "restored edits from a failed flush");
        }
    }

    async fn flush_if_dirty(&mut self) -> FlushSummary {
        if !self.is_dirty() {
            return FlushSummary::NotNeeded;
        }
        match self.flush_active().await {
            Ok(report) => FlushSummary::Saved(report),
            Err(err) => FlushSummary::Failed(err),
        }
    }

    async fn reload(&mut self) -> Result<(), SyncError> {
        let credential = self.credential()?;
        let collection = self.fetch_collection(&credential).await?;
        self.session.store.replace_collection(collection);
        self.last_error = None;
        self.mirror_cache();
        self.publish();
        Ok(())
    }

    async fn fetch_collection(&self, credential: &Credential) -> Result<Collection, SyncError> {
        let checklists = self.remote.fetch_checklists(credential).await?;
        Ok(Collection::new(checklists))
    }

    fn credential(&self) -> Result<Credential, SyncError> {
        self.session
            .credential
            .clone()
            .ok_or(SyncError::NotAuthenticated)
    }

    fn active_id(&self) -> Result<ChecklistId, SyncError> {
        self.session
            .store
            .active_id()
            .cloned()
            .ok_or(SyncError::Store(StoreError::NoActiveChecklist))
    }

    fn saved_status(&self, checklist_id: &ChecklistId, item_id: &ItemId) -> Result<ItemStatus, SyncError> {
        let store = &self.session.store;
        store
            .baseline()
            .get(checklist_id)
            .and_then(|checklist| checklist.item(item_id))
            .or_else(|| {
                store
                    .current()
                    .get(checklist_id)
                    .and_then(|checklist| checklist.item(item_id))
            })
            .map(|item| item.status)
            .ok_or_else(|| StoreError::UnknownItem(item_id.clone()).into())
    }

    /// The cache mirrors the baseline, never unsaved edits.
    fn mirror_cache(&self) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let store = &self.session.store;
        if let Err(err) = cache.save(store.baseline(), store.active_id()) {
            warn!(error = %format!("{err:#}"), "failed to write list cache");
        }
    }

    fn record_error(&mut self, err: &SyncError) {
        self.last_error = Some(notice_for(err).title);
        self.publish();
    }

    fn publish(&self) {
        let next = SyncStatus {
            active: self.session.store.active_id().cloned(),
            dirty: self.is_dirty(),
            switching: self.switching,
            flushing: self.flushing,
            last_error: self.last_error.clone(),
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn non_empty(name: &str) -> Result<&str, SyncError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(SyncError::EmptyName)
    } else {
        Ok(trimmed)
    }
}

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::TempDir;
use tokio::sync::watch;

use packadive::cache::LocalCache;
use packadive::progress::checklist_progress;
use packadive::remote::{ChecklistRemote, ItemUpdate, RemoteError};
use packadive::store::ChecklistStore;
use packadive::sync::{
    FlushSummary, Session, SwitchOutcome, SyncController, SyncError, SyncStatus, UnloadDecision,
};
use packadive::types::{Checklist, ChecklistId, Credential, Item, ItemId, ItemStatus};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Fetch,
    CreateChecklist(String),
    RenameChecklist(String, String),
    DeleteChecklist(String),
    CreateItem(String, String),
    UpdateItem(String, ItemStatus),
    DeleteItem(String),
}

#[derive(Debug, Default)]
struct FakeState {
    checklists: Vec<Checklist>,
    next_id: u64,
    calls: Vec<Call>,
    failing_items: HashSet<String>,
    offline: bool,
    observer: Option<watch::Receiver<SyncStatus>>,
    active_during_updates: Vec<Option<ChecklistId>>,
}

/// In-memory checklist service that records every call.
#[derive(Debug, Default)]
struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    fn with_checklists(checklists: Vec<Checklist>) -> Arc<Self> {
        let remote = Self::default();
        {
            let mut state = remote.lock();
            state.checklists = checklists;
            state.next_id = 100;
        }
        Arc::new(remote)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake remote lock should not be poisoned")
    }

    fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn fail_item(&self, id: &str) {
        self.lock().failing_items.insert(id.to_string());
    }

    /// Records which list the controller reports as active whenever an item
    /// update arrives.
    fn observe(&self, status: watch::Receiver<SyncStatus>) {
        self.lock().observer = Some(status);
    }

    fn active_during_updates(&self) -> Vec<Option<ChecklistId>> {
        self.lock().active_during_updates.clone()
    }

    fn heal(&self) {
        let mut state = self.lock();
        state.failing_items.clear();
        state.offline = false;
    }

    fn set_offline(&self) {
        self.lock().offline = true;
    }

    fn stored_status(&self, checklist: &str, item: &str) -> Option<ItemStatus> {
        self.lock()
            .checklists
            .iter()
            .find(|candidate| candidate.id.as_str() == checklist)
            .and_then(|checklist| checklist.item(&ItemId::new(item)))
            .map(|item| item.status)
    }

    fn begin(&self, call: Call) -> Result<MutexGuard<'_, FakeState>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.offline {
            return Err(RemoteError::Unavailable("connection refused".to_string()));
        }
        Ok(state)
    }
}

impl ChecklistRemote for FakeRemote {
    async fn fetch_checklists(&self, _credential: &Credential) -> Result<Vec<Checklist>, RemoteError> {
        let state = self.begin(Call::Fetch)?;
        Ok(state.checklists.clone())
    }

    async fn create_checklist(
        &self,
        _credential: &Credential,
        name: &str,
    ) -> Result<ChecklistId, RemoteError> {
        let mut state = self.begin(Call::CreateChecklist(name.to_string()))?;
        state.next_id += 1;
        let id = ChecklistId::new(state.next_id.to_string());
        state.checklists.push(Checklist::new(id.clone(), name));
        Ok(id)
    }

    async fn rename_checklist(
        &self,
        _credential: &Credential,
        id: &ChecklistId,
        name: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.begin(Call::RenameChecklist(id.to_string(), name.to_string()))?;
        let checklist = state
            .checklists
            .iter_mut()
            .find(|checklist| &checklist.id == id)
            .ok_or_else(|| RemoteError::Http {
                status: 404,
                message: "no such checklist".to_string(),
            })?;
        checklist.name = name.to_string();
        Ok(())
    }

    async fn delete_checklist(
        &self,
        _credential: &Credential,
        id: &ChecklistId,
    ) -> Result<(), RemoteError> {
        let mut state = self.begin(Call::DeleteChecklist(id.to_string()))?;
        state.checklists.retain(|checklist| &checklist.id != id);
        Ok(())
    }

    async fn create_item(
        &self,
        _credential: &Credential,
        name: &str,
        status: ItemStatus,
        checklist_id: &ChecklistId,
    ) -> Result<ItemId, RemoteError> {
        let mut state = self.begin(Call::CreateItem(checklist_id.to_string(), name.to_string()))?;
        state.next_id += 1;
        let id = ItemId::new(state.next_id.to_string());
        let item = Item::new(id.clone(), name).with_status(status);
        state
            .checklists
            .iter_mut()
            .find(|checklist| &checklist.id == checklist_id)
            .ok_or_else(|| RemoteError::Http {
                status: 404,
                message: "no such checklist".to_string(),
            })?
            .items
            .push(item);
        Ok(id)
    }

    async fn update_item(
        &self,
        _credential: &Credential,
        item_id: &ItemId,
        update: &ItemUpdate,
    ) -> Result<(), RemoteError> {
        let mut state = self.begin(Call::UpdateItem(item_id.to_string(), update.status))?;
        let active = state
            .observer
            .as_ref()
            .and_then(|status| status.borrow().active.clone());
        if state.observer.is_some() {
            state.active_during_updates.push(active);
        }
        if state.failing_items.contains(item_id.as_str()) {
            return Err(RemoteError::Http {
                status: 500,
                message: "update rejected".to_string(),
            });
        }
        if let Some(item) = state
            .checklists
            .iter_mut()
            .find_map(|checklist| checklist.item_mut(item_id))
        {
            item.name = update.name.clone();
            item.status = update.status;
        }
        Ok(())
    }

    async fn delete_item(&self, _credential: &Credential, item_id: &ItemId) -> Result<(), RemoteError> {
        let mut state = self.begin(Call::DeleteItem(item_id.to_string()))?;
        for checklist in &mut state.checklists {
            checklist.items.retain(|item| &item.id != item_id);
        }
        Ok(())
    }
}

fn shore_dive() -> Checklist {
    Checklist::new("1", "Shore Dive").with_items(vec![Item::new("10", "Mask"), Item::new("11", "Fins")])
}

fn boat_dive() -> Checklist {
    Checklist::new("2", "Boat Dive").with_items(vec![Item::new("20", "Reef hook")])
}

fn controller(remote: &Arc<FakeRemote>, cache: Option<LocalCache>) -> SyncController<FakeRemote> {
    let credential = Credential::new("token").expect("credential");
    let session = Session::new(Some(credential), ChecklistStore::default());
    SyncController::new(session, Arc::clone(remote), cache)
}

async fn mounted(remote: &Arc<FakeRemote>) -> SyncController<FakeRemote> {
    let mut controller = controller(remote, None);
    controller.mount().await.expect("mount should fetch");
    controller
}

fn id(raw: &str) -> ChecklistId {
    ChecklistId::new(raw)
}

fn item(raw: &str) -> ItemId {
    ItemId::new(raw)
}

fn update_calls(calls: &[Call]) -> Vec<&Call> {
    calls
        .iter()
        .filter(|call| matches!(call, Call::UpdateItem(..)))
        .collect()
}

#[tokio::test]
async fn end_to_end_shore_dive_then_boat_dive() {
    let remote = FakeRemote::with_checklists(vec![shore_dive()]);
    let mut controller = mounted(&remote).await;

    controller.switch_to(&id("1")).await.expect("switch to shore dive");
    controller.tap_item(&item("10")).expect("first tap");
    let status = controller.tap_item(&item("10")).expect("second tap");
    assert_eq!(status, ItemStatus::Packed);
    let active = controller.store().active_checklist().expect("active");
    assert_eq!(checklist_progress(active), 50);
    assert!(controller.is_dirty());

    remote.clear_calls();
    let outcome = controller
        .create_checklist("Boat Dive")
        .await
        .expect("create should succeed");

    let calls = remote.calls();
    let create_at = calls
        .iter()
        .position(|call| *call == Call::CreateChecklist("Boat Dive".to_string()))
        .expect("create call");
    let updates = update_calls(&calls[..create_at]);
    assert_eq!(updates.len(), 2);
    assert!(updates.contains(&&Call::UpdateItem("10".to_string(), ItemStatus::Packed)));
    assert!(updates.contains(&&Call::UpdateItem("11".to_string(), ItemStatus::NotReady)));
    assert!(matches!(outcome.flush, FlushSummary::Saved(_)));
    assert_eq!(controller.store().active_id(), Some(&outcome.id));
    assert!(!controller.is_dirty());

    controller.switch_to(&id("1")).await.expect("reopen shore dive");
    controller.refresh().await.expect("refresh");
    let shore = controller.store().active_checklist().expect("shore dive");
    assert_eq!(
        shore.item(&item("10")).map(|item| item.status),
        Some(ItemStatus::Packed)
    );
    assert_eq!(remote.stored_status("1", "10"), Some(ItemStatus::Packed));
}

#[tokio::test]
async fn switch_flushes_outgoing_list_before_switching() {
    let remote = FakeRemote::with_checklists(vec![shore_dive(), boat_dive()]);
    let mut controller = mounted(&remote).await;
    controller.switch_to(&id("1")).await.expect("open shore dive");
    controller.tap_item(&item("11")).expect("tap fins");

    remote.clear_calls();
    let mut status = controller.subscribe();
    remote.observe(controller.subscribe());
    let outcome = controller.switch_to(&id("2")).await.expect("switch");

    let calls = remote.calls();
    assert_eq!(update_calls(&calls).len(), 2);
    assert_eq!(remote.active_during_updates(), vec![Some(id("1")); 2]);
    assert_eq!(calls.last(), Some(&Call::Fetch));
    match outcome {
        SwitchOutcome::Switched { previous, flush } => {
            assert_eq!(previous, Some(id("1")));
            assert!(matches!(flush, FlushSummary::Saved(ref report) if report.is_success()));
        }
        SwitchOutcome::AlreadyActive => panic!("expected a switch"),
    }
    assert_eq!(controller.store().active_id(), Some(&id("2")));
    assert_eq!(remote.stored_status("1", "11"), Some(ItemStatus::Checked));

    let published = status.borrow_and_update().clone();
    assert!(!published.dirty);
    assert!(!published.switching);
    assert!(!published.flushing);
}

#[tokio::test]
async fn clean_switch_sends_no_updates() {
    let remote = FakeRemote::with_checklists(vec![shore_dive(), boat_dive()]);
    let mut controller = mounted(&remote).await;
    controller.switch_to(&id("1")).await.expect("open shore dive");

    remote.clear_calls();
    let outcome = controller.switch_to(&id("2")).await.expect("switch");

    assert!(remote.calls().is_empty());
    assert!(matches!(
        outcome,
        SwitchOutcome::Switched {
            flush: FlushSummary::NotNeeded,
            ..
        }
    ));
    assert!(matches!(
        controller.switch_to(&id("2")).await,
        Ok(SwitchOutcome::AlreadyActive)
    ));
}

#[tokio::test]
async fn switch_to_unknown_list_is_invalid_reference() {
    let remote = FakeRemote::with_checklists(vec![shore_dive()]);
    let mut controller = mounted(&remote).await;

    let err = controller
        .switch_to(&id("404"))
        .await
        .expect_err("unknown list");

    assert_eq!(err.code(), "INVALID_REFERENCE");
    assert!(controller.store().active_id().is_none());
}

#[tokio::test]
async fn failed_flush_keeps_dirty_and_still_allows_switch() {
    let remote = FakeRemote::with_checklists(vec![shore_dive(), boat_dive()]);
    let mut controller = mounted(&remote).await;
    controller.switch_to(&id("1")).await.expect("open shore dive");
    controller.tap_item(&item("10")).expect("tap mask");
    controller.tap_item(&item("11")).expect("tap fins");
    remote.fail_item("11");

    let err = controller.save().await.expect_err("flush should fail");
    match &err {
        SyncError::FlushFailure(report) => {
            assert_eq!(report.succeeded, vec![item("10")]);
            assert_eq!(report.failed.len(), 1);
            assert_eq!(report.failed[0].item_id, item("11"));
        }
        other => panic!("expected flush failure, got {other:?}"),
    }
    assert!(controller.is_dirty());
    assert_eq!(
        controller.status().last_error.as_deref(),
        Some("Changes not saved")
    );
    let baseline = controller.store().active_baseline().expect("baseline");
    assert_eq!(
        baseline.item(&item("10")).map(|item| item.status),
        Some(ItemStatus::NotReady)
    );
    assert_eq!(
        baseline.item(&item("11")).map(|item| item.status),
        Some(ItemStatus::NotReady)
    );

    let outcome = controller
        .switch_to(&id("2"))
        .await
        .expect("switch proceeds despite failure");
    assert!(matches!(
        outcome,
        SwitchOutcome::Switched {
            flush: FlushSummary::Failed(SyncError::FlushFailure(_)),
            ..
        }
    ));
    assert_eq!(controller.store().active_id(), Some(&id("2")));

    remote.heal();
    controller.switch_to(&id("1")).await.expect("reopen shore dive");
    assert!(controller.is_dirty(), "failed edit must come back as unsaved");

    controller.save().await.expect("retry should succeed");
    assert!(!controller.is_dirty());
    assert_eq!(remote.stored_status("1", "11"), Some(ItemStatus::Checked));
    assert!(controller.status().last_error.is_none());
}

#[tokio::test]
async fn failure_on_untouched_item_keeps_list_dirty() {
    let remote = FakeRemote::with_checklists(vec![shore_dive(), boat_dive()]);
    let mut controller = mounted(&remote).await;
    controller.switch_to(&id("1")).await.expect("open shore dive");
    controller.tap_item(&item("10")).expect("tap mask");
    remote.fail_item("11");

    let err = controller.save().await.expect_err("fins update fails");

    assert_eq!(err.code(), "FLUSH_FAILURE");
    assert!(controller.is_dirty());
    assert!(controller.status().dirty);

    controller.switch_to(&id("2")).await.expect("switch away");
    remote.heal();
    controller.switch_to(&id("1")).await.expect("reopen shore dive");
    let mask = controller
        .store()
        .active_checklist()
        .and_then(|checklist| checklist.item(&item("10")))
        .map(|item| item.status);
    assert_eq!(mask, Some(ItemStatus::Checked));
    assert!(controller.is_dirty());

    controller.save().await.expect("retry should succeed");
    assert!(!controller.is_dirty());
}

#[tokio::test]
async fn edit_reverted_after_failed_flush_is_not_restored() {
    let remote = FakeRemote::with_checklists(vec![shore_dive(), boat_dive()]);
    let mut controller = mounted(&remote).await;
    controller.switch_to(&id("1")).await.expect("open shore dive");
    controller.tap_item(&item("10")).expect("tap mask");
    remote.fail_item("10");
    controller.switch_to(&id("2")).await.expect("switch despite failure");
    controller.switch_to(&id("1")).await.expect("reopen shore dive");
    assert!(controller.is_dirty());

    controller.tap_item(&item("10")).expect("tap mask to packed");
    let status = controller.tap_item(&item("10")).expect("tap mask back");
    assert_eq!(status, ItemStatus::NotReady);
    assert!(!controller.is_dirty());

    remote.clear_calls();
    controller.switch_to(&id("2")).await.expect("clean switch");
    controller.switch_to(&id("1")).await.expect("reopen shore dive again");

    let mask = controller
        .store()
        .active_checklist()
        .and_then(|checklist| checklist.item(&item("10")))
        .map(|item| item.status);
    assert_eq!(mask, Some(ItemStatus::NotReady));
    assert!(!controller.is_dirty());
    assert!(update_calls(&remote.calls()).is_empty());
}

#[tokio::test]
async fn offline_flush_is_network_unavailable() {
    let remote = FakeRemote::with_checklists(vec![shore_dive()]);
    let mut controller = mounted(&remote).await;
    controller.switch_to(&id("1")).await.expect("open shore dive");
    controller.tap_item(&item("10")).expect("tap");
    remote.set_offline();

    let err = controller.save().await.expect_err("offline");

    assert_eq!(err.code(), "NETWORK_UNAVAILABLE");
    assert!(err.is_retryable());
    assert!(controller.is_dirty());
}

#[tokio::test]
async fn rename_item_sends_saved_status_not_unsaved_tap() {
    let remote = FakeRemote::with_checklists(vec![shore_dive()]);
    let mut controller = mounted(&remote).await;
    controller.switch_to(&id("1")).await.expect("open shore dive");
    controller.tap_item(&item("10")).expect("tap");

    remote.clear_calls();
    controller
        .rename_item(&item("10"), "Low-volume mask")
        .await
        .expect("rename");

    assert_eq!(
        remote.calls(),
        vec![Call::UpdateItem("10".to_string(), ItemStatus::NotReady)]
    );
    let active = controller.store().active_checklist().expect("active");
    let mask = active.item(&item("10")).expect("mask");
    assert_eq!(mask.name, "Low-volume mask");
    assert_eq!(mask.status, ItemStatus::Checked);
    assert!(controller.is_dirty(), "the tap is still unsaved");
}

#[tokio::test]
async fn add_and_delete_items_apply_to_both_copies() {
    let remote = FakeRemote::with_checklists(vec![shore_dive()]);
    let mut controller = mounted(&remote).await;
    controller.switch_to(&id("1")).await.expect("open shore dive");

    let torch = controller.add_item("  Torch ").await.expect("add");
    assert!(!controller.is_dirty());
    let active = controller.store().active_checklist().expect("active");
    assert_eq!(active.items.len(), 3);
    assert_eq!(active.item(&torch).map(|item| item.name.as_str()), Some("Torch"));

    controller.delete_item(&item("11")).await.expect("delete");
    assert!(!controller.is_dirty());
    assert_eq!(controller.store().active_checklist().map(|c| c.items.len()), Some(2));
    assert_eq!(
        remote.calls().last(),
        Some(&Call::DeleteItem("11".to_string()))
    );

    let err = controller.add_item("   ").await.expect_err("blank name");
    assert!(matches!(err, SyncError::EmptyName));
}

#[tokio::test]
async fn rename_and_delete_checklist() {
    let remote = FakeRemote::with_checklists(vec![shore_dive(), boat_dive()]);
    let mut controller = mounted(&remote).await;
    controller.switch_to(&id("2")).await.expect("open boat dive");

    controller
        .rename_checklist(&id("1"), "Night Shore Dive")
        .await
        .expect("rename");
    assert_eq!(
        controller.store().current().get(&id("1")).map(|c| c.name.as_str()),
        Some("Night Shore Dive")
    );
    assert_eq!(
        controller.store().baseline().get(&id("1")).map(|c| c.name.as_str()),
        Some("Night Shore Dive")
    );

    controller.delete_checklist(&id("2")).await.expect("delete");
    assert!(controller.store().active_id().is_none());
    assert!(!controller.store().current().contains(&id("2")));
    assert!(remote.calls().contains(&Call::DeleteChecklist("2".to_string())));
}

#[tokio::test]
async fn operations_without_credential_are_rejected() {
    let remote = FakeRemote::with_checklists(vec![shore_dive()]);
    let session = Session::new(None, ChecklistStore::default());
    let mut controller = SyncController::new(session, Arc::clone(&remote), None);

    controller.mount().await.expect("mount without credential is not an error");
    assert!(remote.calls().is_empty());

    let err = controller
        .create_checklist("Boat Dive")
        .await
        .expect_err("needs a credential");
    assert_eq!(err.code(), "NOT_AUTHENTICATED");
}

#[tokio::test]
async fn tap_without_active_checklist_is_rejected() {
    let remote = FakeRemote::with_checklists(vec![shore_dive()]);
    let mut controller = mounted(&remote).await;

    let err = controller.tap_item(&item("10")).expect_err("no list open");
    assert_eq!(err.code(), "NO_ACTIVE_CHECKLIST");

    controller.switch_to(&id("1")).await.expect("open shore dive");
    let err = controller.tap_item(&item("99")).expect_err("unknown item");
    assert_eq!(err.code(), "INVALID_REFERENCE");
    assert!(!controller.is_dirty());
}

#[tokio::test]
async fn unload_defers_with_running_flush() {
    let remote = FakeRemote::with_checklists(vec![shore_dive()]);
    let mut controller = mounted(&remote).await;
    assert!(matches!(controller.on_unload(), UnloadDecision::Proceed));

    controller.switch_to(&id("1")).await.expect("open shore dive");
    controller.tap_item(&item("11")).expect("tap");

    let UnloadDecision::Defer(handle) = controller.on_unload() else {
        panic!("dirty state should defer unload");
    };
    let report = handle.await.expect("flush task");

    assert!(report.is_success());
    assert_eq!(report.attempted(), 2);
    assert_eq!(remote.stored_status("1", "11"), Some(ItemStatus::Checked));
}

#[tokio::test]
async fn teardown_fires_flush_without_controller() {
    let remote = FakeRemote::with_checklists(vec![shore_dive()]);
    let mut controller = mounted(&remote).await;
    controller.switch_to(&id("1")).await.expect("open shore dive");
    controller.tap_item(&item("10")).expect("tap");

    let handle = controller.teardown().expect("dirty teardown flushes");
    let report = handle.await.expect("flush task");

    assert!(report.is_success());
    assert_eq!(remote.stored_status("1", "10"), Some(ItemStatus::Checked));

    let clean = mounted(&remote).await;
    assert!(clean.teardown().is_none());
}

#[tokio::test]
async fn cache_mirrors_saved_state_and_restores_active_list() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let cache_path = temp_dir.path().join("list_data.json");
    let remote = FakeRemote::with_checklists(vec![shore_dive(), boat_dive()]);

    {
        let mut controller = controller(&remote, Some(LocalCache::new(&cache_path)));
        controller.mount().await.expect("mount");
        controller.switch_to(&id("2")).await.expect("open boat dive");
        controller.tap_item(&item("20")).expect("unsaved tap");
    }

    remote.set_offline();
    let mut offline = controller(&remote, Some(LocalCache::new(&cache_path)));
    let err = offline.mount().await.expect_err("service is offline");
    assert!(matches!(err, SyncError::Remote(RemoteError::Unavailable(_))));

    assert_eq!(offline.store().current().len(), 2);
    assert_eq!(offline.store().active_id(), Some(&id("2")));
    let boat = offline.store().active_checklist().expect("boat dive");
    assert_eq!(
        boat.item(&item("20")).map(|item| item.status),
        Some(ItemStatus::NotReady),
        "unsaved edits never reach the cache"
    );
    assert_eq!(
        offline.status().last_error.as_deref(),
        Some("Checklist service unreachable")
    );
}

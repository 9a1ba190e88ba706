//! The remote checklist service the sync engine persists to.

use std::future::Future;

use thiserror::Error;

use crate::types::{Checklist, ChecklistId, Credential, ItemId, ItemStatus};

pub mod http;

pub use http::{HttpRemote, RemoteConfig};

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum RemoteError {
    /// Connection refused, DNS failure, timeout.
    #[error("checklist service unavailable: {0}")]
    Unavailable(String),
    #[error("checklist service rejected the credential")]
    Unauthorized,
    #[error("checklist service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unexpected response from checklist service: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::Unavailable(_) => "REMOTE_UNAVAILABLE",
            RemoteError::Unauthorized => "REMOTE_UNAUTHORIZED",
            RemoteError::Http { .. } => "REMOTE_HTTP_ERROR",
            RemoteError::Decode(_) => "REMOTE_DECODE_ERROR",
        }
    }
}

/// Payload of an item update. The name travels with the status so the same
/// call covers both status changes and renames.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ItemUpdate {
    pub name: String,
    pub status: ItemStatus,
}

/// Operations the sync engine needs from the checklist service.
///
/// Futures are `Send` so flushes can be fanned out on the tokio runtime.
pub trait ChecklistRemote: Send + Sync + 'static {
    fn fetch_checklists(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Vec<Checklist>, RemoteError>> + Send;

    fn create_checklist(
        &self,
        credential: &Credential,
        name: &str,
    ) -> impl Future<Output = Result<ChecklistId, RemoteError>> + Send;

    fn rename_checklist(
        &self,
        credential: &Credential,
        id: &ChecklistId,
        name: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn delete_checklist(
        &self,
        credential: &Credential,
        id: &ChecklistId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn create_item(
        &self,
        credential: &Credential,
        name: &str,
        status: ItemStatus,
        checklist_id: &ChecklistId,
    ) -> impl Future<Output = Result<ItemId, RemoteError>> + Send;

    fn update_item(
        &self,
        credential: &Credential,
        item_id: &ItemId,
        update: &ItemUpdate,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn delete_item(
        &self,
        credential: &Credential,
        item_id: &ItemId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

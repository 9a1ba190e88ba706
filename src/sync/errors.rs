use thiserror::Error;

use crate::remote::RemoteError;
use crate::store::StoreError;

use super::flush::FlushReport;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(
        "changes not saved: {} of {} item updates failed",
        .0.failed.len(),
        .0.attempted()
    )]
    FlushFailure(FlushReport),
    #[error("not signed in; set PACKADIVE_TOKEN or pass --token")]
    NotAuthenticated,
    #[error("name cannot be empty")]
    EmptyName,
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Store(StoreError::NoActiveChecklist) => "NO_ACTIVE_CHECKLIST",
            SyncError::Store(_) => "INVALID_REFERENCE",
            SyncError::Remote(err) => err.code(),
            SyncError::FlushFailure(report) if report.is_network_unavailable() => {
                "NETWORK_UNAVAILABLE"
            }
            SyncError::FlushFailure(_) => "FLUSH_FAILURE",
            SyncError::NotAuthenticated => "NOT_AUTHENTICATED",
            SyncError::EmptyName => "EMPTY_NAME",
        }
    }

    /// Whether trying the same thing again later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::FlushFailure(_)
                | SyncError::Remote(RemoteError::Unavailable(_))
                | SyncError::Remote(RemoteError::Http { .. })
        )
    }
}

/// Short message for the user, plus the full error chain.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Notice {
    pub title: String,
    pub detail: String,
    pub retryable: bool,
}

pub fn notice_for(err: &SyncError) -> Notice {
    let title = match err {
        SyncError::FlushFailure(_) => "Changes not saved",
        SyncError::Remote(RemoteError::Unavailable(_)) => "Checklist service unreachable",
        SyncError::Remote(RemoteError::Unauthorized) | SyncError::NotAuthenticated => {
            "Sign-in required"
        }
        SyncError::Remote(_) => "Checklist service error",
        SyncError::Store(StoreError::NoActiveChecklist) => "No checklist selected",
        SyncError::Store(_) => "Not found",
        SyncError::EmptyName => "Name required",
    };

    let mut detail = err.to_string();
    if let SyncError::FlushFailure(report) = err {
        for failed in &report.failed {
            detail.push_str(&format!("\n  item {}: {}", failed.item_id, failed.error));
        }
        detail.push_str("\nYour edits are kept locally and will be retried on the next save.");
    }

    Notice {
        title: title.to_string(),
        detail,
        retryable: err.is_retryable(),
    }
}

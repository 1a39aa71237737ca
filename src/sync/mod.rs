//! List synchronization: refresh scheduling, cross-view edits, change toasts.
//!
//! The list view is a single task that owns its snapshot. Everything else
//! (refresh fetches, lifecycle transitions, edits from the edit view) reaches
//! it as a message.

mod edit;
mod lifecycle;
mod notify;
mod reconcile;
mod relay;
mod scheduler;

pub use edit::{EditOutcome, EditSession};
pub use lifecycle::{AppState, LifecycleSignal};
pub use notify::{Notifier, Toast, ToastKind};
pub use reconcile::{has_visible_changes, merge_pending, Reconciler};
pub use relay::{PendingUpdate, RelayReceiver, RouteParams, UpdateRelay};
pub use scheduler::{mount, ListState, ListView, ListViewHandle, RefreshTrigger};

use thiserror::Error;

/// Errors raised inside the sync layer.
///
/// None of these reach the user as a toast. They are logged where they occur.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A refresh finished after its list view was torn down.
    #[error("Discarded {trigger} refresh result for a torn-down view")]
    StaleViewDiscard { trigger: RefreshTrigger },

    /// Navigation parameters carried a value that could not be parsed.
    #[error("Malformed update parameter {key}: {value:?}")]
    MalformedParams { key: &'static str, value: String },

    /// The list view task is gone.
    #[error("List view is no longer running")]
    ViewClosed,
}

//! Cross-view update relay.
//!
//! The edit view hands its result to the list view as a set of navigation
//! parameters. Delivering replaces the whole set; the list view applies it and
//! then acknowledges, which clears the set only if nothing newer arrived.

use super::SyncError;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// String-keyed navigation parameters.
pub type RouteParams = BTreeMap<String, String>;

const KEY_UPDATED: &str = "updated";
const KEY_ID: &str = "updatedCategoryId";
const KEY_NAME: &str = "updatedCategoryName";
const KEY_IMAGE_URL: &str = "updatedCategoryImageUrl";
const KEY_TIMESTAMP: &str = "timestamp";

/// One-shot message describing an edit made in another view.
///
/// `None` fields were not changed by the edit. An update with no fields is a
/// no-op edit that still tells the list view the edit view has closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub category_id: i64,
    pub new_name: Option<String>,
    pub new_image_url: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl PendingUpdate {
    /// Creates an update stamped with the current time at millisecond precision.
    pub fn new(category_id: i64) -> Self {
        Self {
            category_id,
            new_name: None,
            new_image_url: None,
            issued_at: Utc::now().trunc_subsecs(3),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.new_name = Some(name.into());
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.new_image_url = Some(image_url.into());
        self
    }

    pub fn is_noop(&self) -> bool {
        self.new_name.is_none() && self.new_image_url.is_none()
    }

    /// Identity used for de-duplication.
    pub fn key(&self) -> (i64, DateTime<Utc>) {
        (self.category_id, self.issued_at)
    }

    /// Encodes the update as navigation parameters. Unchanged fields are omitted.
    pub fn to_params(&self) -> RouteParams {
        let mut params = RouteParams::new();
        params.insert(KEY_UPDATED.to_string(), "true".to_string());
        params.insert(KEY_ID.to_string(), self.category_id.to_string());
        if let Some(name) = &self.new_name {
            params.insert(KEY_NAME.to_string(), name.clone());
        }
        if let Some(image_url) = &self.new_image_url {
            params.insert(KEY_IMAGE_URL.to_string(), image_url.clone());
        }
        params.insert(
            KEY_TIMESTAMP.to_string(),
            self.issued_at.timestamp_millis().to_string(),
        );
        params
    }

    /// Decodes navigation parameters.
    ///
    /// Returns `Ok(None)` when the parameters carry no update (`updated` is
    /// absent or not `"true"`). An empty name is treated as unchanged, since a
    /// category name is never empty.
    pub fn from_params(params: &RouteParams) -> Result<Option<Self>, SyncError> {
        if params.get(KEY_UPDATED).map(String::as_str) != Some("true") {
            return Ok(None);
        }

        let raw_id = params.get(KEY_ID).cloned().unwrap_or_default();
        let category_id = raw_id
            .trim()
            .parse::<i64>()
            .map_err(|_| SyncError::MalformedParams {
                key: KEY_ID,
                value: raw_id.clone(),
            })?;

        let raw_ts = params.get(KEY_TIMESTAMP).cloned().unwrap_or_default();
        let issued_at = raw_ts
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| SyncError::MalformedParams {
                key: KEY_TIMESTAMP,
                value: raw_ts.clone(),
            })?;

        Ok(Some(Self {
            category_id,
            new_name: params.get(KEY_NAME).filter(|n| !n.is_empty()).cloned(),
            new_image_url: params.get(KEY_IMAGE_URL).cloned(),
            issued_at,
        }))
    }
}

/// Sending side of the relay, held by edit views.
#[derive(Debug, Clone)]
pub struct UpdateRelay {
    tx: Arc<watch::Sender<RouteParams>>,
}

impl UpdateRelay {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RouteParams::new());
        Self { tx: Arc::new(tx) }
    }

    /// Replaces the attached parameters with `update`.
    pub fn deliver(&self, update: &PendingUpdate) {
        tracing::debug!(
            category_id = update.category_id,
            issued_at = %update.issued_at,
            "Delivering pending update"
        );
        self.tx.send_replace(update.to_params());
    }

    /// Replaces the attached parameters with raw values.
    pub fn deliver_params(&self, params: RouteParams) {
        self.tx.send_replace(params);
    }

    pub fn subscribe(&self) -> RelayReceiver {
        RelayReceiver {
            rx: self.tx.subscribe(),
            tx: Arc::clone(&self.tx),
        }
    }

    /// Currently attached parameters.
    pub fn peek(&self) -> RouteParams {
        self.tx.borrow().clone()
    }
}

impl Default for UpdateRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the relay, held by the list view.
#[derive(Debug)]
pub struct RelayReceiver {
    rx: watch::Receiver<RouteParams>,
    tx: Arc<watch::Sender<RouteParams>>,
}

impl RelayReceiver {
    /// Waits until the attached parameters change.
    pub async fn changed(&mut self) -> Result<(), SyncError> {
        self.rx.changed().await.map_err(|_| SyncError::ViewClosed)
    }

    /// Returns the attached parameters and marks them seen.
    pub fn current(&mut self) -> RouteParams {
        self.rx.borrow_and_update().clone()
    }

    /// Clears the parameters if they still equal `seen`.
    ///
    /// Returns false when a newer delivery replaced them in the meantime.
    pub fn acknowledge(&self, seen: &RouteParams) -> bool {
        self.tx.send_if_modified(|current| {
            if current == seen && !current.is_empty() {
                current.clear();
                true
            } else {
                false
            }
        })
    }
}

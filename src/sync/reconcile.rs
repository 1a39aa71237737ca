use super::relay::PendingUpdate;
use crate::api::Category;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// How many applied `(category_id, issued_at)` keys are remembered.
const APPLIED_CAPACITY: usize = 64;

/// Applies a pending update to a snapshot, returning the new snapshot.
///
/// Only the category with the matching id changes, and only in the fields
/// the update carries. An unknown id yields an identical snapshot.
pub fn merge_pending(snapshot: &[Category], update: &PendingUpdate) -> Vec<Category> {
    snapshot
        .iter()
        .map(|category| {
            if category.id != update.category_id {
                return category.clone();
            }
            Category {
                id: category.id,
                name: update
                    .new_name
                    .clone()
                    .unwrap_or_else(|| category.name.clone()),
                image_url: update
                    .new_image_url
                    .clone()
                    .unwrap_or_else(|| category.image_url.clone()),
            }
        })
        .collect()
}

/// True if `next` adds a category or changes a name or image URL relative to
/// `previous`. Removals alone do not count.
pub fn has_visible_changes(previous: &[Category], next: &[Category]) -> bool {
    let by_id: HashMap<i64, &Category> = previous.iter().map(|c| (c.id, c)).collect();
    next.iter().any(|category| match by_id.get(&category.id) {
        Some(prev) => prev.differs_visibly(category),
        None => true,
    })
}

/// Remembers the last observed snapshot and which pending updates were applied.
#[derive(Debug)]
pub struct Reconciler {
    previous: Option<Vec<Category>>,
    applied: LruCache<(i64, DateTime<Utc>), ()>,
}

impl Reconciler {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(APPLIED_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            previous: None,
            applied: LruCache::new(capacity),
        }
    }

    /// Records `next` as the current snapshot.
    ///
    /// Returns true when a change notification is due: there was a non-empty
    /// previous snapshot and `next` differs visibly from it.
    pub fn observe(&mut self, next: &[Category]) -> bool {
        let changed = match &self.previous {
            Some(prev) if !prev.is_empty() && !next.is_empty() => has_visible_changes(prev, next),
            _ => false,
        };
        self.previous = Some(next.to_vec());
        changed
    }

    /// Merges `update` into `snapshot` unless it was already applied.
    ///
    /// Returns `None` for a duplicate delivery.
    pub fn apply(&mut self, snapshot: &[Category], update: &PendingUpdate) -> Option<Vec<Category>> {
        let key = update.key();
        if self.applied.contains(&key) {
            tracing::debug!(
                category_id = update.category_id,
                issued_at = %update.issued_at,
                "Ignoring duplicate pending update"
            );
            return None;
        }
        self.applied.put(key, ());
        Some(merge_pending(snapshot, update))
    }

    pub fn has_seen_snapshot(&self) -> bool {
        self.previous.is_some()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

use super::relay::{PendingUpdate, UpdateRelay};
use crate::api::{ApiError, Category, CategoryClient, Persisted, UpdateError};

/// Result of submitting an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// Nothing changed; no request was made.
    Unchanged(PendingUpdate),
    /// The backend accepted the edit.
    Saved {
        update: PendingUpdate,
        persisted: Persisted,
    },
}

impl EditOutcome {
    /// The update handed to the list view.
    pub fn update(&self) -> &PendingUpdate {
        match self {
            EditOutcome::Unchanged(update) => update,
            EditOutcome::Saved { update, .. } => update,
        }
    }
}

/// Edit view for one category at a time.
///
/// Persists through the client's update chain and hands the result to the
/// list view over the relay.
#[derive(Debug, Clone)]
pub struct EditSession {
    client: CategoryClient,
    relay: UpdateRelay,
}

impl EditSession {
    pub fn new(client: CategoryClient, relay: UpdateRelay) -> Self {
        Self { client, relay }
    }

    /// Loads the category being edited.
    pub async fn load(&self, id: i64) -> Result<Category, ApiError> {
        self.client.get(id).await
    }

    /// Submits new values for `original`.
    ///
    /// A blank name is rejected before any request. Unchanged values deliver
    /// an empty update without touching the backend. On failure nothing is
    /// delivered.
    pub async fn submit(
        &self,
        original: &Category,
        name: &str,
        image_url: &str,
    ) -> Result<EditOutcome, UpdateError> {
        if name.trim().is_empty() {
            return Err(UpdateError::InvalidName);
        }

        let name_changed = name != original.name;
        let image_changed = image_url != original.image_url;

        if !name_changed && !image_changed {
            tracing::debug!(category_id = original.id, "No changes to submit");
            let update = PendingUpdate::new(original.id);
            self.relay.deliver(&update);
            return Ok(EditOutcome::Unchanged(update));
        }

        let edited = Category::new(original.id, name, image_url);
        let persisted = self.client.update(&edited).await?;

        let mut update = PendingUpdate::new(original.id);
        if name_changed {
            update = update.with_name(persisted.category.name.clone());
        }
        if image_changed {
            update = update.with_image_url(persisted.category.image_url.clone());
        }
        self.relay.deliver(&update);

        Ok(EditOutcome::Saved { update, persisted })
    }
}

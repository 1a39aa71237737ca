//! Ordered fallback strategies for persisting a category edit.
//!
//! The backend is known to reject some of the standard update verbs, and
//! which ones differs between deployments. [`UpdateChain`] walks a fixed
//! list of [`UpdateStrategy`] values strictly in order and stops at the
//! first one the server accepts.

use super::error::ApiError;
use super::probe::{CapabilityProber, CapabilityRecord};
use super::transport::{ApiRequest, ApiResponse, RequestBody, Transport};
use super::types::{Category, Verb};
use std::collections::BTreeSet;
use thiserror::Error;

/// Where a strategy sends its request(s), relative to the resource root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// `{resource}/{id}`
    Item,
    /// `{resource}`
    Collection,
    /// `{resource}/{action}`
    Action(&'static str),
    /// `{resource}/{action}/{id}`
    ActionItem(&'static str),
    /// One request per field: `{resource}/{name}` then `{resource}/{image}`
    FieldActions {
        name: &'static str,
        image: &'static str,
    },
}

/// How the category fields travel to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Form,
    Query,
}

/// One fully specified attempt at persisting an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStrategy {
    pub name: &'static str,
    pub verb: Verb,
    pub target: Target,
    pub encoding: Encoding,
}

/// Strategies in the order they are attempted by default.
pub const DEFAULT_STRATEGIES: [UpdateStrategy; 8] = [
    UpdateStrategy {
        name: "put-json",
        verb: Verb::Put,
        target: Target::Item,
        encoding: Encoding::Json,
    },
    UpdateStrategy {
        name: "post-json",
        verb: Verb::Post,
        target: Target::Item,
        encoding: Encoding::Json,
    },
    UpdateStrategy {
        name: "patch-json",
        verb: Verb::Patch,
        target: Target::Item,
        encoding: Encoding::Json,
    },
    UpdateStrategy {
        name: "put-form",
        verb: Verb::Put,
        target: Target::Item,
        encoding: Encoding::Form,
    },
    UpdateStrategy {
        name: "post-edit",
        verb: Verb::Post,
        target: Target::ActionItem("Edit"),
        encoding: Encoding::Json,
    },
    UpdateStrategy {
        name: "get-query",
        verb: Verb::Get,
        target: Target::Action("Update"),
        encoding: Encoding::Query,
    },
    UpdateStrategy {
        name: "get-fields",
        verb: Verb::Get,
        target: Target::FieldActions {
            name: "UpdateName",
            image: "UpdateImage",
        },
        encoding: Encoding::Query,
    },
    UpdateStrategy {
        name: "post-root",
        verb: Verb::Post,
        target: Target::Collection,
        encoding: Encoding::Json,
    },
];

impl UpdateStrategy {
    pub fn by_name(name: &str) -> Option<UpdateStrategy> {
        DEFAULT_STRATEGIES
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
            .copied()
    }

    /// Resolve a configured list of strategy names.
    ///
    /// Unknown names are logged and dropped. An empty list, or one where
    /// nothing resolves, yields [`DEFAULT_STRATEGIES`].
    pub fn resolve(names: &[String]) -> Vec<UpdateStrategy> {
        let resolved: Vec<_> = names
            .iter()
            .filter_map(|name| {
                let found = Self::by_name(name);
                if found.is_none() {
                    tracing::warn!(strategy = %name, "Unknown update strategy in config, ignoring");
                }
                found
            })
            .collect();

        if resolved.is_empty() {
            DEFAULT_STRATEGIES.to_vec()
        } else {
            resolved
        }
    }

    /// Build the request(s) this strategy issues for `category`.
    pub fn requests(
        &self,
        resource: &str,
        category: &Category,
    ) -> Result<Vec<ApiRequest>, serde_json::Error> {
        let id = category.id.to_string();

        let segments = match self.target {
            Target::Item => vec![resource.to_owned(), id.clone()],
            Target::Collection => vec![resource.to_owned()],
            Target::Action(action) => vec![resource.to_owned(), action.to_owned()],
            Target::ActionItem(action) => vec![resource.to_owned(), action.to_owned(), id.clone()],
            Target::FieldActions { name, image } => {
                return Ok(vec![
                    ApiRequest::new(self.verb, vec![resource.to_owned(), name.to_owned()])
                        .with_query(vec![
                            ("id".into(), id.clone()),
                            ("name".into(), category.name.clone()),
                        ]),
                    ApiRequest::new(self.verb, vec![resource.to_owned(), image.to_owned()])
                        .with_query(vec![
                            ("id".into(), id),
                            ("imageUrl".into(), category.image_url.clone()),
                        ]),
                ]);
            }
        };

        let fields = [
            ("id", id.as_str()),
            ("name", category.name.as_str()),
            ("imageUrl", category.image_url.as_str()),
        ];
        let request = ApiRequest::new(self.verb, segments);
        let request = match self.encoding {
            Encoding::Json => request.with_body(RequestBody::Json(serde_json::to_vec(category)?)),
            Encoding::Form => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish();
                request.with_body(RequestBody::Form(encoded))
            }
            Encoding::Query => request.with_query(
                fields
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                    .collect(),
            ),
        };
        Ok(vec![request])
    }
}

/// Errors surfaced by [`UpdateChain::update`].
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Name was empty or whitespace-only; nothing was sent
    #[error("Category name cannot be empty")]
    InvalidName,
    /// Every eligible strategy failed
    #[error(
        "All update strategies failed ({attempted} attempted, {skipped} skipped){}",
        last_failure_suffix(.last_status, .last_body, .last_error)
    )]
    ExhaustedStrategies {
        attempted: usize,
        skipped: usize,
        last_status: Option<u16>,
        last_body: Option<String>,
        last_error: Option<String>,
    },
}

fn last_failure_suffix(
    status: &Option<u16>,
    body: &Option<String>,
    error: &Option<String>,
) -> String {
    match (status, body.as_deref().map(str::trim), error) {
        (Some(status), Some(body), _) if !body.is_empty() => {
            format!(": last status {status} - {body}")
        }
        (Some(status), _, _) => format!(": last status {status}"),
        (None, _, Some(error)) => format!(": {error}"),
        _ => String::new(),
    }
}

/// A successfully persisted edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persisted {
    /// Server representation, or the submitted value if the server sent none
    pub category: Category,
    /// Name of the strategy that succeeded
    pub strategy: &'static str,
    /// Number of strategies attempted, including the successful one
    pub attempts: usize,
}

#[derive(Debug)]
enum AttemptFailure {
    Transport(ApiError),
    Rejected { status: u16, body: String },
    Encode(serde_json::Error),
}

/// Runs strategies in order until one persists the edit.
///
/// The chain never touches any list state. Skipping is driven by the
/// shared [`CapabilityRecord`]: a verb recorded as unsupported when a run
/// starts is not attempted during that run.
#[derive(Debug, Clone)]
pub struct UpdateChain {
    transport: Transport,
    resource: String,
    strategies: Vec<UpdateStrategy>,
    record: CapabilityRecord,
    prober: Option<CapabilityProber>,
}

impl UpdateChain {
    pub fn new(transport: Transport, resource: impl Into<String>, record: CapabilityRecord) -> Self {
        Self {
            transport,
            resource: resource.into(),
            strategies: DEFAULT_STRATEGIES.to_vec(),
            record,
            prober: None,
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<UpdateStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Run capability discovery once per record before the first attempt.
    pub fn with_discovery(mut self, prober: CapabilityProber) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn strategies(&self) -> &[UpdateStrategy] {
        &self.strategies
    }

    pub fn record(&self) -> &CapabilityRecord {
        &self.record
    }

    /// Persist `category` using the first strategy the server accepts.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::InvalidName`] - blank name, no request sent
    /// - [`UpdateError::ExhaustedStrategies`] - no strategy succeeded; carries
    ///   the last status and body seen
    pub async fn update(&self, category: &Category) -> Result<Persisted, UpdateError> {
        if category.name.trim().is_empty() {
            return Err(UpdateError::InvalidName);
        }

        if let Some(prober) = &self.prober {
            prober.ensure_discovered(&self.record).await;
        }

        // Knowledge gained during this run applies from the next run on
        let unsupported: BTreeSet<Verb> = self.record.unsupported();

        let mut attempted = 0;
        let mut skipped = 0;
        let mut last_failure: Option<AttemptFailure> = None;

        for strategy in &self.strategies {
            if unsupported.contains(&strategy.verb) {
                tracing::debug!(
                    strategy = strategy.name,
                    verb = %strategy.verb,
                    "Skipping strategy, verb known unsupported"
                );
                skipped += 1;
                continue;
            }

            attempted += 1;
            match self.attempt(strategy, category).await {
                Ok(persisted) => {
                    self.record.mark_supported(strategy.verb);
                    tracing::info!(
                        category_id = category.id,
                        strategy = strategy.name,
                        attempts = attempted,
                        "Category update persisted"
                    );
                    return Ok(Persisted {
                        category: persisted,
                        strategy: strategy.name,
                        attempts: attempted,
                    });
                }
                Err(failure) => {
                    self.note_failure(strategy, &failure);
                    last_failure = Some(failure);
                }
            }
        }

        let (last_status, last_body, last_error) = match last_failure {
            Some(AttemptFailure::Rejected { status, body }) => (Some(status), Some(body), None),
            Some(AttemptFailure::Transport(e)) => (None, None, Some(e.to_string())),
            Some(AttemptFailure::Encode(e)) => (None, None, Some(e.to_string())),
            None => (None, None, None),
        };

        tracing::warn!(
            category_id = category.id,
            attempted,
            skipped,
            last_status = ?last_status,
            "All update strategies exhausted"
        );

        Err(UpdateError::ExhaustedStrategies {
            attempted,
            skipped,
            last_status,
            last_body,
            last_error,
        })
    }

    async fn attempt(
        &self,
        strategy: &UpdateStrategy,
        category: &Category,
    ) -> Result<Category, AttemptFailure> {
        let requests = strategy
            .requests(&self.resource, category)
            .map_err(AttemptFailure::Encode)?;

        let mut last: Option<ApiResponse> = None;
        for (index, request) in requests.iter().enumerate() {
            let response = self
                .transport
                .execute(request)
                .await
                .map_err(AttemptFailure::Transport)?;

            if !response.is_success() {
                if index > 0 {
                    tracing::warn!(
                        strategy = strategy.name,
                        category_id = category.id,
                        "Strategy failed after earlier requests succeeded, update may be partially applied"
                    );
                }
                return Err(AttemptFailure::Rejected {
                    status: response.status,
                    body: response.text(),
                });
            }
            last = Some(response);
        }

        // A 2xx means the write was accepted; the chain stops here either way
        let Some(response) = last else {
            return Ok(category.clone());
        };
        Ok(resolve_persisted(category, &response.body))
    }

    fn note_failure(&self, strategy: &UpdateStrategy, failure: &AttemptFailure) {
        match failure {
            AttemptFailure::Rejected { status, body } => {
                // Only these statuses speak about the verb itself rather than the path
                if matches!(status, 405 | 501) {
                    self.record.mark_unsupported(strategy.verb);
                }
                tracing::debug!(
                    strategy = strategy.name,
                    status,
                    body = %body.trim(),
                    "Update strategy rejected"
                );
            }
            AttemptFailure::Transport(e) => {
                tracing::debug!(strategy = strategy.name, error = %e, "Update strategy transport failure");
            }
            AttemptFailure::Encode(e) => {
                tracing::warn!(strategy = strategy.name, error = %e, "Failed to encode update payload");
            }
        }
    }
}

/// Interpret a 2xx body. Always yields the submitted value.
///
/// An echo that disagrees with `submitted` (a server that trims or re-cases
/// names, or answers with stale state) is logged and otherwise ignored.
fn resolve_persisted(submitted: &Category, body: &[u8]) -> Category {
    if body.iter().all(u8::is_ascii_whitespace) {
        return submitted.clone();
    }
    match serde_json::from_slice::<Category>(body) {
        Ok(returned) if returned == *submitted => returned,
        Ok(returned) => {
            tracing::warn!(
                category_id = submitted.id,
                returned_id = returned.id,
                returned_name = %returned.name,
                "Update accepted but the server echoed a different category state, keeping submitted values"
            );
            submitted.clone()
        }
        Err(_) => {
            tracing::debug!("Update response is not a category, using submitted value");
            submitted.clone()
        }
    }
}

use super::error::ApiError;
use super::probe::{CapabilityProber, CapabilityRecord};
use super::strategy::{Persisted, UpdateChain, UpdateError, UpdateStrategy};
use super::transport::{ApiRequest, RequestBody, Transport};
use super::types::{Category, NewCategory, Verb};
use crate::config::Config;
use crate::util::UrlValidationError;

/// Client for the category resource family.
///
/// Reads are plain REST calls. Updates go through an [`UpdateChain`] that
/// shares this client's [`CapabilityRecord`], so what one edit learns about
/// the backend applies to the next edit in the same session.
#[derive(Debug, Clone)]
pub struct CategoryClient {
    transport: Transport,
    resource: String,
    prober: CapabilityProber,
    chain: UpdateChain,
}

impl CategoryClient {
    pub fn new(
        transport: Transport,
        resource: impl Into<String>,
        probe_id: i64,
        strategies: Vec<UpdateStrategy>,
        record: CapabilityRecord,
    ) -> Self {
        let resource = resource.into();
        let prober = CapabilityProber::new(transport.clone(), resource.clone(), probe_id);
        let chain = UpdateChain::new(transport.clone(), resource.clone(), record)
            .with_strategies(strategies)
            .with_discovery(prober.clone());
        Self {
            transport,
            resource,
            prober,
            chain,
        }
    }

    /// Build a client from configuration with a fresh session record.
    pub fn from_config(config: &Config) -> Result<Self, UrlValidationError> {
        let transport = Transport::new(
            &config.base_url,
            config.request_timeout(),
            config.api_token(),
        )?;
        Ok(Self::new(
            transport,
            config.resource.clone(),
            config.probe_id,
            UpdateStrategy::resolve(&config.update_strategies),
            CapabilityRecord::default(),
        ))
    }

    pub fn prober(&self) -> &CapabilityProber {
        &self.prober
    }

    pub fn chain(&self) -> &UpdateChain {
        &self.chain
    }

    pub fn record(&self) -> &CapabilityRecord {
        self.chain.record()
    }

    fn collection(&self) -> Vec<String> {
        vec![self.resource.clone()]
    }

    fn item(&self, id: i64) -> Vec<String> {
        vec![self.resource.clone(), id.to_string()]
    }

    /// Fetch the full category list.
    pub async fn list(&self) -> Result<Vec<Category>, ApiError> {
        let response = self
            .transport
            .send(&ApiRequest::new(Verb::Get, self.collection()))
            .await?;
        let categories: Vec<Category> = serde_json::from_slice(&response.body)?;
        tracing::debug!(count = categories.len(), "Fetched categories");
        Ok(categories)
    }

    /// Fetch one category by id.
    pub async fn get(&self, id: i64) -> Result<Category, ApiError> {
        let response = self
            .transport
            .send(&ApiRequest::new(Verb::Get, self.item(id)))
            .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Create a category; the backend assigns the id.
    pub async fn create(&self, category: &NewCategory) -> Result<Category, ApiError> {
        let body = serde_json::to_vec(category)?;
        let response = self
            .transport
            .send(
                &ApiRequest::new(Verb::Post, self.collection()).with_body(RequestBody::Json(body)),
            )
            .await?;
        let created: Category = serde_json::from_slice(&response.body)?;
        tracing::info!(category_id = created.id, name = %created.name, "Category created");
        Ok(created)
    }

    /// Persist an edited category through the update strategy chain.
    pub async fn update(&self, category: &Category) -> Result<Persisted, UpdateError> {
        self.chain.update(category).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
        self.transport
            .send(&ApiRequest::new(Verb::Delete, self.item(id)))
            .await?;
        tracing::info!(category_id = id, "Category deleted");
        Ok(())
    }
}

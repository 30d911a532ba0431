//! Adapter lookup and provider resolution.

use thiserror::Error;
use tracing::warn;

use inkstone_db::models::provider::ProviderConfig;
use inkstone_db::models::task::AiTask;
use inkstone_db::models::template::ApiTemplate;
use inkstone_db::repositories::ProviderRepo;
use inkstone_db::DbPool;

use crate::adapter::ProviderAdapter;
use crate::adapters::{
    GeminiAdapter, MeituAdapter, NanoBananaAdapter, SimpleAdapter, StandardAdapter,
};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("no provider available")]
    NoProvider,
    #[error("no adapter registered for api_kind {0:?}")]
    UnknownKind(String),
}

/// Holds one adapter instance per known `api_kind`.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// Build the full adapter set over a shared HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            adapters: vec![
                Box::new(NanoBananaAdapter::new(client.clone())),
                Box::new(StandardAdapter::new(client.clone())),
                Box::new(GeminiAdapter::new(client.clone())),
                Box::new(SimpleAdapter::new(client.clone())),
                Box::new(MeituAdapter::new(client)),
            ],
        }
    }

    /// Adapter serving a given `api_kind` tag.
    pub fn adapter_for(&self, api_kind: &str) -> Result<&dyn ProviderAdapter, ResolveError> {
        self.adapters
            .iter()
            .map(Box::as_ref)
            .find(|adapter| adapter.api_kind() == api_kind)
            .ok_or_else(|| ResolveError::UnknownKind(api_kind.to_string()))
    }

    /// Resolve the provider for a task.
    ///
    /// Resolution order: the template's pinned provider, the provider
    /// already stored on the task, a kind-matched active provider when
    /// the template requires a kind, then the active default. Inactive
    /// or kind-mismatched candidates are skipped with a warning.
    pub async fn resolve_provider(
        &self,
        pool: &DbPool,
        task: &AiTask,
        template: &ApiTemplate,
    ) -> Result<ProviderConfig, ResolveError> {
        let required_kind = template.provider_kind_required.as_deref();

        for candidate_id in [template.provider_config_id, task.provider_config_id]
            .into_iter()
            .flatten()
        {
            if let Some(provider) = ProviderRepo::find_by_id(pool, candidate_id).await? {
                if usable(&provider, required_kind) {
                    return Ok(provider);
                }
                warn!(
                    provider = %provider.name,
                    task_id = task.id,
                    "pinned provider unusable, falling through"
                );
            }
        }

        if let Some(kind) = required_kind {
            if let Some(provider) = ProviderRepo::active_by_kind(pool, kind).await? {
                return Ok(provider);
            }
        }

        if let Some(provider) = ProviderRepo::default_active(pool).await? {
            if usable(&provider, required_kind) {
                return Ok(provider);
            }
        }
        Err(ResolveError::NoProvider)
    }
}

fn usable(provider: &ProviderConfig, required_kind: Option<&str>) -> bool {
    provider.is_active && required_kind.map_or(true, |kind| provider.api_kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_builtin_kind() {
        let registry = AdapterRegistry::new(reqwest::Client::new());
        for kind in ["nano_banana", "standard", "gemini", "simple", "meitu_retouch"] {
            assert!(registry.adapter_for(kind).is_ok(), "missing {kind}");
        }
        assert!(matches!(
            registry.adapter_for("comfy_dreams"),
            Err(ResolveError::UnknownKind(_))
        ));
    }
}

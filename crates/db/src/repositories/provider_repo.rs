//! Repository for the `provider_configs` table.

use sqlx::PgPool;

use inkstone_core::types::DbId;

use crate::models::provider::ProviderConfig;

const COLUMNS: &str = "\
    id, name, api_kind, host, submit_endpoint, poll_endpoint, upload_endpoint, \
    credentials, is_active, is_default, is_sync, priority, model_name, \
    created_at, updated_at";

/// Read access to provider configurations.
pub struct ProviderRepo;

impl ProviderRepo {
    /// Find a provider config by ID, active or not.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<ProviderConfig>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM provider_configs WHERE id = $1");
        sqlx::query_as::<_, ProviderConfig>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The single active default provider, if one is configured.
    pub async fn default_active(pool: &PgPool) -> Result<Option<ProviderConfig>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM provider_configs \
             WHERE is_default AND is_active \
             ORDER BY priority DESC LIMIT 1"
        );
        sqlx::query_as::<_, ProviderConfig>(&query)
            .fetch_optional(pool)
            .await
    }

    /// Highest-priority active provider of a given adapter kind.
    pub async fn active_by_kind(
        pool: &PgPool,
        api_kind: &str,
    ) -> Result<Option<ProviderConfig>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM provider_configs \
             WHERE api_kind = $1 AND is_active \
             ORDER BY priority DESC, id ASC LIMIT 1"
        );
        sqlx::query_as::<_, ProviderConfig>(&query)
            .bind(api_kind)
            .fetch_optional(pool)
            .await
    }
}

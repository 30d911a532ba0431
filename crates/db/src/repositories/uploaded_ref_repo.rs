//! Repository for the `uploaded_refs` dedupe cache.
//!
//! Keys uploads by content hash so the same customer photo is pushed to
//! a given provider at most once; later dispatches reuse the remote URL.

use sqlx::PgPool;

use inkstone_core::types::DbId;

/// Read/insert access to the upload dedupe cache.
pub struct UploadedRefRepo;

impl UploadedRefRepo {
    /// Remote URL previously recorded for this provider + content hash.
    pub async fn find(
        pool: &PgPool,
        provider_config_id: DbId,
        sha256: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT url FROM uploaded_refs \
             WHERE provider_config_id = $1 AND sha256 = $2",
        )
        .bind(provider_config_id)
        .bind(sha256)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(url,)| url))
    }

    /// Record a completed upload. Concurrent uploads of the same photo
    /// race benignly; the first insert wins and later ones keep its URL.
    pub async fn record(
        pool: &PgPool,
        provider_config_id: DbId,
        sha256: &str,
        url: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO uploaded_refs (provider_config_id, sha256, url) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (provider_config_id, sha256) DO NOTHING",
        )
        .bind(provider_config_id)
        .bind(sha256)
        .bind(url)
        .execute(pool)
        .await?;
        Ok(())
    }
}

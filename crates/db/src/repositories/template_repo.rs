//! Repository for the `api_templates` table.

use sqlx::PgPool;

use inkstone_core::types::DbId;

use crate::models::template::ApiTemplate;

const COLUMNS: &str = "\
    id, product_id, style_id, provider_config_id, provider_kind_required, \
    prompts, workflow_params, expected_output_count, watermark_required, \
    created_at, updated_at";

/// Read access to generation templates.
pub struct TemplateRepo;

impl TemplateRepo {
    /// Find a template by ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<ApiTemplate>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM api_templates WHERE id = $1");
        sqlx::query_as::<_, ApiTemplate>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Most specific template for a product and optional style.
    ///
    /// A style-exact match wins over a product-wide (`style_id IS NULL`)
    /// template; among equals the newest row wins.
    pub async fn find_for_product(
        pool: &PgPool,
        product_id: DbId,
        style_id: Option<DbId>,
    ) -> Result<Option<ApiTemplate>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM api_templates \
             WHERE product_id = $1 AND (style_id = $2 OR style_id IS NULL) \
             ORDER BY (style_id IS NOT NULL) DESC, created_at DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, ApiTemplate>(&query)
            .bind(product_id)
            .bind(style_id)
            .fetch_optional(pool)
            .await
    }
}

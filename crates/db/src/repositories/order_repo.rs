//! Repository for the `orders` table.
//!
//! Coordinator transitions run inside a transaction: the order row is
//! taken `FOR UPDATE`, the transition guard row is inserted, and the
//! status plus its companion fields are written together. The
//! `&mut PgConnection` methods exist for that path; plain reads take a
//! pool.

use sqlx::{PgConnection, PgPool};

use inkstone_core::types::{DbId, Timestamp};

use crate::models::order::{CreateOrder, Order};

/// Column list for `orders` queries.
const COLUMNS: &str = "\
    id, order_number, status, product_id, style_id, customer_contact, openid, \
    price_fen, paid_at, payment_method, selected_image_id, \
    final_image_path, final_image_path_clean, shipping_address, logistics, \
    shipped_at, completed_at, franchisee_id, promotion_code, input_refs, \
    product_code, size_code, generation_retries, print_attempts, \
    print_external_id, created_at, updated_at";

/// Provides CRUD and transition-support operations for orders.
pub struct OrderRepo;

impl OrderRepo {
    /// Create a new order in `created` state.
    pub async fn create(
        pool: &PgPool,
        order_number: &str,
        input: &CreateOrder,
    ) -> Result<Order, sqlx::Error> {
        let query = format!(
            "INSERT INTO orders \
                 (order_number, product_id, style_id, customer_contact, openid, \
                  price_fen, shipping_address, input_refs, product_code, size_code, \
                  franchisee_id, promotion_code) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Order>(&query)
            .bind(order_number)
            .bind(input.product_id)
            .bind(input.style_id)
            .bind(&input.customer_contact)
            .bind(&input.openid)
            .bind(input.price_fen)
            .bind(&input.shipping_address)
            .bind(serde_json::json!(input.input_refs))
            .bind(&input.product_code)
            .bind(&input.size_code)
            .bind(input.franchisee_id)
            .bind(input.promotion_code.as_deref())
            .fetch_one(pool)
            .await
    }

    /// Find an order by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Order>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM orders WHERE id = $1");
        sqlx::query_as::<_, Order>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find an order by its external order number.
    pub async fn find_by_order_number(
        pool: &PgPool,
        order_number: &str,
    ) -> Result<Option<Order>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM orders WHERE order_number = $1");
        sqlx::query_as::<_, Order>(&query)
            .bind(order_number)
            .fetch_optional(pool)
            .await
    }

    /// Row-lock an order inside an open transaction.
    ///
    /// Serializes concurrent coordinator transitions for the same order;
    /// the second arrival blocks here and then observes the new state.
    pub async fn lock_by_id(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<Order>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Order>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Write the new status (and `updated_at`) inside the transition
    /// transaction.
    pub async fn set_status(
        conn: &mut PgConnection,
        id: DbId,
        status: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Companion fields for the `payment_received` transition.
    pub async fn set_paid_fields(
        conn: &mut PgConnection,
        id: DbId,
        payment_method: &str,
        paid_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE orders SET paid_at = $2, payment_method = $3 WHERE id = $1 AND paid_at IS NULL",
        )
        .bind(id)
        .bind(paid_at)
        .bind(payment_method)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Companion fields for the `user_selected` transition: pin the image
    /// and both fulfillment paths.
    pub async fn set_selection_fields(
        conn: &mut PgConnection,
        id: DbId,
        selected_image_id: DbId,
        final_image_path: &str,
        final_image_path_clean: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE orders \
             SET selected_image_id = $2, final_image_path = $3, final_image_path_clean = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(selected_image_id)
        .bind(final_image_path)
        .bind(final_image_path_clean)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Companion fields for `logistics_received`. `shipped_at` is set
    /// once and never cleared.
    pub async fn set_shipped_fields(
        conn: &mut PgConnection,
        id: DbId,
        logistics: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE orders \
             SET logistics = $2, shipped_at = COALESCE(shipped_at, NOW()) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(logistics)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Companion field for `delivery_confirmed`.
    pub async fn set_completed_at(conn: &mut PgConnection, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE orders SET completed_at = COALESCE(completed_at, NOW()) WHERE id = $1",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Record the print service's external id after a submission.
    pub async fn set_print_external_id(
        pool: &PgPool,
        id: DbId,
        external_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE orders SET print_external_id = $2 WHERE id = $1")
            .bind(id)
            .bind(external_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Bump and return the print attempt counter.
    pub async fn increment_print_attempts(pool: &PgPool, id: DbId) -> Result<i32, sqlx::Error> {
        let (count,): (i32,) = sqlx::query_as(
            "UPDATE orders SET print_attempts = print_attempts + 1 \
             WHERE id = $1 RETURNING print_attempts",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// Bump and return the generation retry counter.
    pub async fn increment_generation_retries(
        pool: &PgPool,
        id: DbId,
    ) -> Result<i32, sqlx::Error> {
        let (count,): (i32,) = sqlx::query_as(
            "UPDATE orders SET generation_retries = generation_retries + 1 \
             WHERE id = $1 RETURNING generation_retries",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }
}

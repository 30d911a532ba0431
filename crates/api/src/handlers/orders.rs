//! Mini-program order endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use inkstone_core::order_number;
use inkstone_core::types::DbId;
use inkstone_core::CoreError;
use inkstone_db::models::order::{CreateOrder, Order};
use inkstone_db::models::task::AiTask;
use inkstone_db::models::transition::OrderTransition;
use inkstone_db::repositories::{OrderRepo, TaskRepo, TemplateRepo, TransitionRepo};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// `POST /api/miniprogram/orders`
///
/// Creates the order in `created` state. A product with no bound
/// template is rejected here rather than failing later in dispatch.
pub async fn create_order(
    State(state): State<AppState>,
    Json(input): Json<CreateOrder>,
) -> AppResult<(StatusCode, Json<DataResponse<Order>>)> {
    if input.input_refs.is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "at least one input image is required".to_string(),
        )));
    }
    if input.customer_contact.trim().is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "customer contact is required".to_string(),
        )));
    }
    if input.price_fen < 0 {
        return Err(AppError::Core(CoreError::Validation(
            "price must not be negative".to_string(),
        )));
    }
    if TemplateRepo::find_for_product(&state.pool, input.product_id, input.style_id)
        .await?
        .is_none()
    {
        return Err(AppError::Core(CoreError::TemplateMissing {
            product_id: input.product_id,
            style_id: input.style_id,
        }));
    }

    let order_number = order_number::generate();
    let order = OrderRepo::create(&state.pool, &order_number, &input).await?;
    tracing::info!(order_id = order.id, order_number = %order.order_number, "order created");
    Ok((StatusCode::CREATED, Json(DataResponse { data: order })))
}

/// Order detail returned to the mini-program.
#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub latest_task: Option<AiTask>,
    /// Lifecycle history, oldest first.
    pub transitions: Vec<OrderTransition>,
}

/// `GET /api/miniprogram/order/{order_number}`
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> AppResult<Json<DataResponse<OrderDetail>>> {
    let order = OrderRepo::find_by_order_number(&state.pool, &order_number)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "order",
            id: 0,
        })?;
    let latest_task = TaskRepo::latest_for_order(&state.pool, order.id).await?;
    let transitions = TransitionRepo::list_for_order(&state.pool, order.id).await?;
    Ok(Json(DataResponse {
        data: OrderDetail {
            order,
            latest_task,
            transitions,
        },
    }))
}

/// Client-driven order advances.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    /// One of `user_selected`, `submitted_to_print`,
    /// `delivery_confirmed`, `admin_cancel`.
    pub event: String,
    /// Required for `user_selected`.
    pub image_id: Option<DbId>,
}

#[derive(Debug, Serialize)]
pub struct UpdateStatusResponse {
    pub order_id: DbId,
    pub status: &'static str,
}

/// `PUT /api/miniprogram/orders/{order_id}/status`
pub async fn update_status(
    State(state): State<AppState>,
    Path(order_id): Path<DbId>,
    Json(request): Json<UpdateStatusRequest>,
) -> AppResult<Json<DataResponse<UpdateStatusResponse>>> {
    let applied = match request.event.as_str() {
        "user_selected" => {
            let image_id = request.image_id.ok_or_else(|| {
                AppError::BadRequest("user_selected requires image_id".to_string())
            })?;
            state.coordinator.select_image(order_id, image_id).await?
        }
        "submitted_to_print" => state.coordinator.submit_to_print(order_id).await?,
        "delivery_confirmed" => state.coordinator.confirm_delivery(order_id).await?,
        "admin_cancel" => state.coordinator.cancel(order_id).await?,
        other => {
            return Err(AppError::BadRequest(format!(
                "unsupported status event {other:?}"
            )))
        }
    };
    Ok(Json(DataResponse {
        data: UpdateStatusResponse {
            order_id,
            status: applied.to.as_str(),
        },
    }))
}

use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Router,
};

use super::{reply, AppState, JsonBody, QueryParams};
use crate::models::item_types::{CreateItemTypeRequest, ItemTypeQuery};
use crate::services::{dispatch, item_types::ItemTypeRequest, ServiceError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/itemtypes/create", post(create_item_type))
        .route("/itemtypes", get(list_item_types))
}

async fn create_item_type(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<CreateItemTypeRequest>,
) -> Result<Response, ServiceError> {
    let item_type = dispatch(&state.channels.item_types, |response| {
        ItemTypeRequest::Create { request, response }
    })
    .await?;

    Ok(reply(StatusCode::CREATED, "Item Type created successfully!", item_type))
}

async fn list_item_types(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<ItemTypeQuery>,
) -> Result<Response, ServiceError> {
    let item_types = dispatch(&state.channels.item_types, |response| {
        ItemTypeRequest::List { query, response }
    })
    .await?;

    Ok(reply(StatusCode::OK, "Item type list", item_types))
}

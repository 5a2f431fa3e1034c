use async_trait::async_trait;
use sqlx::PgPool;

use super::{RequestHandler, Responder, Service, ServiceError};
use crate::{
    models::item_types::{reference_id, CreateItemTypeRequest, ItemType, ItemTypeQuery},
    repositories::item_types::ItemTypeRepository,
};

pub enum ItemTypeRequest {
    Create {
        request: CreateItemTypeRequest,
        response: Responder<ItemType>,
    },
    List {
        query: ItemTypeQuery,
        response: Responder<Vec<ItemType>>,
    },
}

#[derive(Clone)]
pub struct ItemTypeRequestHandler {
    repository: ItemTypeRepository,
}

impl ItemTypeRequestHandler {
    pub fn new(sql_conn: PgPool) -> Self {
        let repository = ItemTypeRepository::new(sql_conn);

        ItemTypeRequestHandler { repository }
    }

    async fn create(&self, request: CreateItemTypeRequest) -> Result<ItemType, ServiceError> {
        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ServiceError::Validation("name is required".to_string()))?;
        let category_id = reference_id(request.category_id.as_ref())
            .ok_or_else(|| ServiceError::Validation("categoryId is required".to_string()))?;
        let sub_category_id = reference_id(request.sub_category_id.as_ref())
            .ok_or_else(|| ServiceError::Validation("subCategoryId is required".to_string()))?;

        self.repository
            .insert_item_type(name, &category_id, &sub_category_id)
            .await
            .map_err(ServiceError::database)
    }

    async fn list(&self, query: &ItemTypeQuery) -> Result<Vec<ItemType>, ServiceError> {
        let sub_category_id = query
            .sub_category_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        self.repository
            .get_item_types(sub_category_id)
            .await
            .map_err(ServiceError::database)
    }
}

#[async_trait]
impl RequestHandler<ItemTypeRequest> for ItemTypeRequestHandler {
    async fn handle_request(&self, request: ItemTypeRequest) {
        match request {
            ItemTypeRequest::Create { request, response } => {
                let item_type = self.create(request).await;
                let _ = response.send(item_type);
            }
            ItemTypeRequest::List { query, response } => {
                let item_types = self.list(&query).await;
                let _ = response.send(item_types);
            }
        }
    }
}

pub struct ItemTypeService;

impl ItemTypeService {
    pub fn new() -> Self {
        ItemTypeService {}
    }
}

#[async_trait]
impl Service<ItemTypeRequest, ItemTypeRequestHandler> for ItemTypeService {}

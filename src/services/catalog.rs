use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::category,
    entities::order_item::Model as OrderItemModel,
    entities::product::{self, Entity as ProductEntity, Model as ProductModel},
    entities::product_variant::{self, Entity as VariantEntity},
    errors::ServiceError,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 200))]
    pub slug: String,
    pub description: Option<String>,
    #[validate(length(min = 1))]
    pub sku: String,
    pub price: Decimal,
    #[validate(range(min = 0))]
    pub stock: i32,
    pub image_url: Option<String>,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub stock: Option<i32>,
    pub image_url: Option<String>,
    pub category_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ProductWithVariants {
    #[serde(flatten)]
    pub product: ProductModel,
    pub variants: Vec<product_variant::Model>,
}

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(slug = %request.slug))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProductModel, ServiceError> {
        request.validate()?;

        let now = Utc::now();
        let created = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            slug: Set(request.slug),
            description: Set(request.description),
            sku: Set(request.sku),
            price: Set(request.price),
            stock: Set(request.stock),
            image_url: Set(request.image_url),
            category_id: Set(request.category_id),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %created.id, "Product created");
        Ok(created)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<ProductWithVariants, ServiceError> {
        let product = ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;

        let variants = VariantEntity::find()
            .filter(product_variant::Column::ProductId.eq(id))
            .all(&*self.db)
            .await?;

        Ok(ProductWithVariants { product, variants })
    }

    pub async fn list_products(
        &self,
        page: u64,
        limit: u64,
        category_id: Option<Uuid>,
    ) -> Result<(Vec<ProductModel>, u64), ServiceError> {
        let mut query = ProductEntity::find().filter(product::Column::IsActive.eq(true));
        if let Some(category) = category_id {
            query = query.filter(product::Column::CategoryId.eq(category));
        }

        let paginator = query
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((products, total))
    }

    #[instrument(skip(self, request), fields(product_id = %id))]
    pub async fn update_product(
        &self,
        id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<ProductModel, ServiceError> {
        let current = ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;

        let mut active: product::ActiveModel = current.into();
        if let Some(v) = request.name {
            active.name = Set(v);
        }
        if let Some(v) = request.description {
            active.description = Set(Some(v));
        }
        if let Some(v) = request.price {
            active.price = Set(v);
        }
        if let Some(v) = request.stock {
            active.stock = Set(v);
        }
        if let Some(v) = request.image_url {
            active.image_url = Set(Some(v));
        }
        if let Some(v) = request.category_id {
            active.category_id = Set(Some(v));
        }
        if let Some(v) = request.is_active {
            active.is_active = Set(v);
        }
        active.updated_at = Set(Some(Utc::now()));

        Ok(active.update(&*self.db).await?)
    }

    /// Soft-deletes a product by deactivating it; order item snapshots keep
    /// their copies of the name/price.
    pub async fn deactivate_product(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(product::Column::IsActive, Expr::value(false))
            .filter(product::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Product {} not found", id)));
        }
        Ok(())
    }

    pub async fn create_category(
        &self,
        name: String,
        slug: String,
        description: Option<String>,
    ) -> Result<category::Model, ServiceError> {
        let now = Utc::now();
        Ok(category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            slug: Set(slug),
            description: Set(description),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.db)
        .await?)
    }

    pub async fn list_categories(&self) -> Result<Vec<category::Model>, ServiceError> {
        Ok(category::Entity::find()
            .filter(category::Column::IsActive.eq(true))
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?)
    }
}

/// Decrements stock for every line item of a paid order on the caller's
/// transaction. Guarded so a row is only touched while enough stock remains;
/// any shortfall aborts the whole transaction. When an item references a
/// variant, the variant row and the parent product are decremented together.
pub async fn decrement_stock_for_items<C: ConnectionTrait>(
    conn: &C,
    items: &[OrderItemModel],
) -> Result<(), ServiceError> {
    for item in items {
        if let Some(variant_id) = item.variant_id {
            let result = VariantEntity::update_many()
                .col_expr(
                    product_variant::Column::Stock,
                    Expr::col(product_variant::Column::Stock).sub(item.quantity),
                )
                .filter(product_variant::Column::Id.eq(variant_id))
                .filter(product_variant::Column::Stock.gte(item.quantity))
                .exec(conn)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::InsufficientStock(format!(
                    "variant {} has fewer than {} units",
                    item.sku, item.quantity
                )));
            }
        }

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(item.quantity),
            )
            .filter(product::Column::Id.eq(item.product_id))
            .filter(product::Column::Stock.gte(item.quantity))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "product {} has fewer than {} units",
                item.name, item.quantity
            )));
        }
    }
    Ok(())
}

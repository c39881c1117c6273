use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Singleton settings row (first-found-or-create). The settings service turns
/// this into a plain `ShipmentAutomation` value; orchestration code receives
/// that value explicitly and never reads this table itself.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "store_settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Create a shipment automatically as soon as payment completes.
    pub auto_create_shipment: bool,
    /// Require an admin to approve the order before any shipment is created.
    pub require_order_approval: bool,

    /// Registered pickup location name at the logistics provider.
    pub pickup_location: String,
    pub pickup_pincode: String,

    pub last_updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, DatabaseConnection, EntityTrait, QueryOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::store_settings::{self, Entity as StoreSettingsEntity, Model as StoreSettingsModel},
    errors::ServiceError,
};

/// Explicit automation policy handed to the fulfillment and payment services.
/// Derived from the settings row on each use so orchestration code never
/// touches the singleton itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentAutomation {
    pub auto_create_shipment: bool,
    pub require_order_approval: bool,
    pub pickup_location: String,
    pub pickup_pincode: String,
}

impl ShipmentAutomation {
    /// Shipments are created on payment success only when automation is on and
    /// no manual approval gate is configured.
    pub fn triggers_on_payment(&self) -> bool {
        self.auto_create_shipment && !self.require_order_approval
    }
}

impl From<&StoreSettingsModel> for ShipmentAutomation {
    fn from(model: &StoreSettingsModel) -> Self {
        Self {
            auto_create_shipment: model.auto_create_shipment,
            require_order_approval: model.require_order_approval,
            pickup_location: model.pickup_location.clone(),
            pickup_pincode: model.pickup_pincode.clone(),
        }
    }
}

/// Fields an admin may change. Unset fields keep their current value.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SettingsPatch {
    pub auto_create_shipment: Option<bool>,
    pub require_order_approval: Option<bool>,
    pub pickup_location: Option<String>,
    pub pickup_pincode: Option<String>,
}

#[derive(Clone)]
pub struct StoreSettingsService {
    db: Arc<DatabaseConnection>,
}

impl StoreSettingsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Returns the settings row, creating it with defaults on first access.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self) -> Result<StoreSettingsModel, ServiceError> {
        if let Some(existing) = StoreSettingsEntity::find()
            .order_by_asc(store_settings::Column::Id)
            .one(&*self.db)
            .await?
        {
            return Ok(existing);
        }

        let created = store_settings::ActiveModel {
            id: Set(Uuid::new_v4()),
            auto_create_shipment: Set(true),
            require_order_approval: Set(false),
            pickup_location: Set("Primary".to_string()),
            pickup_pincode: Set(String::new()),
            last_updated_by: Set(None),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        info!("Store settings initialized with defaults");
        Ok(created)
    }

    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        patch: SettingsPatch,
        actor: Uuid,
    ) -> Result<StoreSettingsModel, ServiceError> {
        let current = self.get_or_create().await?;
        let mut active: store_settings::ActiveModel = current.into();

        if let Some(v) = patch.auto_create_shipment {
            active.auto_create_shipment = Set(v);
        }
        if let Some(v) = patch.require_order_approval {
            active.require_order_approval = Set(v);
        }
        if let Some(v) = patch.pickup_location {
            active.pickup_location = Set(v);
        }
        if let Some(v) = patch.pickup_pincode {
            active.pickup_pincode = Set(v);
        }
        active.last_updated_by = Set(Some(actor));
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;
        info!(actor = %actor, "Store settings updated");
        Ok(updated)
    }

    /// Materializes the automation policy for orchestration calls.
    pub async fn shipment_automation(&self) -> Result<ShipmentAutomation, ServiceError> {
        let settings = self.get_or_create().await?;
        Ok(ShipmentAutomation::from(&settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn automation_requires_both_toggles() {
        let mut automation = ShipmentAutomation {
            auto_create_shipment: true,
            require_order_approval: false,
            pickup_location: "Primary".into(),
            pickup_pincode: "110001".into(),
        };
        assert!(automation.triggers_on_payment());

        automation.require_order_approval = true;
        assert!(!automation.triggers_on_payment());

        automation.require_order_approval = false;
        automation.auto_create_shipment = false;
        assert!(!automation.triggers_on_payment());
    }
}

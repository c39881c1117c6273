//! Shared test harness: in-memory SQLite, real services, and a scripted
//! logistics provider standing in for Shiprocket.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tokio::sync::mpsc;
use uuid::Uuid;

use kangan_api::{
    config::{AppConfig, RazorpayConfig, ShiprocketConfig, StripeConfig},
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::AppServices,
    migrator::Migrator,
    services::notifications::{LogMailer, Mailer},
    services::orders::{OrderDetail, PlaceOrderItem, PlaceOrderRequest},
    services::settings::ShipmentAutomation,
    services::shiprocket::{
        AwbAssignment, CourierChoices, CourierOption, LogisticsProvider, PickupConfirmation,
        PickupLocation, RemoteShipment, ShipmentRequest, TrackingInfo,
    },
};

/// Scripted logistics provider. Counts calls and can be told to fail AWB
/// assignment the way the real provider sometimes does.
#[derive(Default)]
pub struct MockLogistics {
    pub create_calls: AtomicUsize,
    pub awb_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub pickup_calls: AtomicUsize,
    /// When set, created orders come back without an AWB and explicit AWB
    /// assignment fails too.
    pub fail_awb: AtomicBool,
}

#[async_trait]
impl LogisticsProvider for MockLogistics {
    async fn create_order(
        &self,
        request: &ShipmentRequest,
    ) -> Result<RemoteShipment, ServiceError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_awb.load(Ordering::SeqCst) {
            Ok(RemoteShipment {
                order_id: format!("SR-{}-{}", request.order_number, n),
                shipment_id: format!("SHIP-{}", n),
                awb: None,
                courier_id: None,
                courier_name: None,
            })
        } else {
            Ok(RemoteShipment {
                order_id: format!("SR-{}-{}", request.order_number, n),
                shipment_id: format!("SHIP-{}", n),
                awb: Some(format!("AWB{:06}", n)),
                courier_id: Some(7),
                courier_name: Some("Delhivery".to_string()),
            })
        }
    }

    async fn serviceable_couriers(
        &self,
        _pickup_pincode: &str,
        _delivery_pincode: &str,
        _weight_kg: f64,
        _cod: bool,
    ) -> Result<CourierChoices, ServiceError> {
        Ok(CourierChoices {
            recommended_id: Some(7),
            couriers: vec![CourierOption {
                id: 7,
                courier_name: "Delhivery".to_string(),
                rate: 80.0,
                etd: None,
            }],
        })
    }

    async fn generate_awb(
        &self,
        _shipment_id: &str,
        courier_id: i64,
    ) -> Result<AwbAssignment, ServiceError> {
        let n = self.awb_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_awb.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalApiError(
                "courier not accepting pickups".to_string(),
            ));
        }
        Ok(AwbAssignment {
            awb: format!("AWB{:06}", n),
            courier_id,
            courier_name: "Delhivery".to_string(),
        })
    }

    async fn track_by_awb(&self, awb: &str) -> Result<TrackingInfo, ServiceError> {
        Ok(TrackingInfo {
            awb: awb.to_string(),
            current_status: "IN TRANSIT".to_string(),
            scans: vec![],
        })
    }

    async fn cancel_shipment(&self, _awb_codes: &[String]) -> Result<(), ServiceError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn request_pickup(
        &self,
        shipment_id: &str,
    ) -> Result<PickupConfirmation, ServiceError> {
        self.pickup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PickupConfirmation {
            shipment_id: shipment_id.to_string(),
            scheduled_at: Some("2025-11-10 09:00".to_string()),
        })
    }

    async fn pickup_locations(&self) -> Result<Vec<PickupLocation>, ServiceError> {
        Ok(vec![])
    }

    async fn add_pickup_location(
        &self,
        _location: &kangan_api::services::shiprocket::NewPickupLocation,
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}

pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub logistics: Arc<MockLogistics>,
    // Keep the receiver alive so event sends do not error.
    _event_rx: mpsc::Receiver<Event>,
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: "test-secret-key-for-integration-tests-64-chars-long-padding!!!!".to_string(),
        jwt_expiration: 3600,
        host: None,
        port: 0,
        environment: "development".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        auto_migrate: true,
        cors_allowed_origins: None,
        email_from: "orders@kangan.shop".to_string(),
        stripe: StripeConfig::default(),
        razorpay: RazorpayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: "test_secret".to_string(),
            webhook_secret: "whsec_test".to_string(),
        },
        shiprocket: ShiprocketConfig::default(),
    }
}

impl TestApp {
    pub async fn new() -> Self {
        // A single connection keeps the whole suite on one in-memory SQLite
        // database.
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.expect("sqlite connect");
        Migrator::up(&db, None).await.expect("migrations");
        let db = Arc::new(db);

        let (tx, rx) = mpsc::channel(1024);
        let event_sender = Arc::new(EventSender::new(tx));

        let logistics = Arc::new(MockLogistics::default());
        let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);
        let config = test_config();
        let services = AppServices::with_parts(
            db.clone(),
            event_sender,
            &config,
            mailer,
            Some(logistics.clone() as Arc<dyn LogisticsProvider>),
        );

        Self {
            db,
            services,
            logistics,
            _event_rx: rx,
        }
    }

    pub fn automation(&self) -> ShipmentAutomation {
        ShipmentAutomation {
            auto_create_shipment: true,
            require_order_approval: false,
            pickup_location: "Primary".to_string(),
            pickup_pincode: "110001".to_string(),
        }
    }

    pub async fn seed_product(&self, sku: &str, stock: i32) -> Uuid {
        let product = self
            .services
            .catalog
            .create_product(kangan_api::services::catalog::CreateProductRequest {
                name: format!("Meenakari Bangle {}", sku),
                slug: format!("meenakari-bangle-{}", sku.to_lowercase()),
                description: Some("Hand-enamelled brass bangle".to_string()),
                sku: sku.to_string(),
                price: dec!(650.00),
                stock,
                image_url: None,
                category_id: None,
            })
            .await
            .expect("seed product");
        product.id
    }

    pub async fn place_order(&self, product_id: Uuid, quantity: i32) -> OrderDetail {
        self.services
            .orders
            .place_order(
                Uuid::new_v4(),
                PlaceOrderRequest {
                    customer_email: "asha@example.com".to_string(),
                    customer_name: "Asha Devi".to_string(),
                    items: vec![PlaceOrderItem {
                        product_id,
                        variant_id: None,
                        quantity,
                    }],
                    shipping_address: r#"{"address":"12 MG Road","city":"Jaipur","state":"Rajasthan","pincode":"302001","phone":"9876543210"}"#.to_string(),
                    billing_address: None,
                    shipping_cost: Some(dec!(80.00)),
                    discount: None,
                    currency: "INR".to_string(),
                    payment_method: None,
                    notes: None,
                },
            )
            .await
            .expect("place order")
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        self.services
            .catalog
            .get_product(product_id)
            .await
            .expect("product")
            .product
            .stock
    }
}

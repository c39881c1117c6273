pub mod auth;
pub mod orders;
pub mod payments;
pub mod products;
pub mod razorpay;
pub mod settings;
pub mod shipping;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        catalog::CatalogService,
        fulfillment::FulfillmentService,
        notifications::{LogMailer, Mailer, OrderMailer},
        orders::OrderService,
        payments::{PaymentService, RazorpayGateway, StripeGateway},
        settings::StoreSettingsService,
        shiprocket::{LogisticsProvider, ShiprocketClient},
    },
    AppState,
};

/// Business-logic services shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub catalog: Arc<CatalogService>,
    pub settings: Arc<StoreSettingsService>,
    pub payments: Arc<PaymentService>,
    pub fulfillment: Arc<FulfillmentService>,
    pub stripe: Arc<StripeGateway>,
    pub razorpay: Arc<RazorpayGateway>,
    pub shiprocket: Arc<ShiprocketClient>,
}

impl AppServices {
    /// Wires the full service graph from configuration. The Shiprocket client
    /// doubles as the `LogisticsProvider` implementation handed to
    /// fulfillment.
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);
        Self::with_parts(db, event_sender, config, mailer, None)
    }

    /// Variant used by tests to substitute the mailer and logistics provider.
    pub fn with_parts(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        mailer: Arc<dyn Mailer>,
        logistics: Option<Arc<dyn LogisticsProvider>>,
    ) -> Self {
        let shiprocket = Arc::new(ShiprocketClient::new(config.shiprocket.clone()));
        let logistics: Arc<dyn LogisticsProvider> = match logistics {
            Some(provider) => provider,
            None => shiprocket.clone(),
        };

        let order_mailer = Arc::new(OrderMailer::new(mailer, config.email_from.clone()));
        let stripe = Arc::new(StripeGateway::new(config.stripe.clone()));
        let razorpay = Arc::new(RazorpayGateway::new(config.razorpay.clone()));

        let orders = Arc::new(OrderService::new(db.clone(), event_sender.clone()));
        let catalog = Arc::new(CatalogService::new(db.clone()));
        let settings = Arc::new(StoreSettingsService::new(db.clone()));
        let fulfillment = Arc::new(FulfillmentService::new(
            db.clone(),
            event_sender.clone(),
            logistics,
            order_mailer.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            db,
            event_sender,
            stripe.clone(),
            razorpay.clone(),
            fulfillment.clone(),
            order_mailer,
        ));

        Self {
            orders,
            catalog,
            settings,
            payments,
            fulfillment,
            stripe,
            razorpay,
            shiprocket,
        }
    }
}

/// All `/api/v1` routes.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        // catalog
        .route("/products", get(products::list_products).post(products::create_product))
        .route(
            "/products/:id",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
        .route(
            "/categories",
            get(products::list_categories).post(products::create_category),
        )
        // orders
        .route("/orders", get(orders::list_orders).post(orders::place_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/approve", post(orders::approve_order))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route("/orders/:id/return", post(orders::return_order))
        .route("/orders/:id/tracking", get(orders::order_tracking))
        // Stripe payments
        .route("/payments/intent", post(payments::create_intent))
        .route("/payments/confirm", post(payments::confirm_payment))
        .route("/payments/refund", post(payments::refund_payment))
        .route("/payments/webhook", post(payments::stripe_webhook))
        // Razorpay payments
        .route("/razorpay/order", post(razorpay::create_order))
        .route("/razorpay/verify", post(razorpay::verify_payment))
        .route("/razorpay/refund", post(razorpay::refund_payment))
        .route("/razorpay/webhook", post(razorpay::razorpay_webhook))
        // shipping
        .route("/shipping/shipments", post(shipping::create_shipment))
        .route("/shipping/orders/:id/ship", post(shipping::ship_order))
        .route("/shipping/bulk/create", post(shipping::bulk_create_shipments))
        .route("/shipping/bulk/ship", post(shipping::bulk_ship_orders))
        .route("/shipping/track/:awb", get(shipping::track_shipment))
        .route("/shipping/rates", get(shipping::shipping_rates))
        .route(
            "/shipping/pickup-locations",
            get(shipping::pickup_locations).post(shipping::add_pickup_location),
        )
        .route("/shipping/webhook", post(shipping::shiprocket_webhook))
        // admin settings
        .route(
            "/settings",
            get(settings::get_settings).put(settings::update_settings),
        )
}

/// Liveness probe with a DB ping.
pub async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, crate::errors::ServiceError> {
    use sea_orm::{ConnectionTrait, Statement};

    state
        .db
        .execute(Statement::from_string(
            state.db.get_database_backend(),
            "SELECT 1".to_string(),
        ))
        .await?;

    Ok(axum::Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

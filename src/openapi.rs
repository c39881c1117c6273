use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kangan Storefront API",
        description = "Catalog, orders, payments (Stripe/Razorpay), and Shiprocket shipment tracking"
    ),
    paths(
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::create_product,
        crate::handlers::products::update_product,
        crate::handlers::products::delete_product,
        crate::handlers::products::list_categories,
        crate::handlers::products::create_category,
        crate::handlers::orders::place_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::approve_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::return_order,
        crate::handlers::orders::order_tracking,
        crate::handlers::payments::create_intent,
        crate::handlers::payments::confirm_payment,
        crate::handlers::payments::refund_payment,
        crate::handlers::payments::stripe_webhook,
        crate::handlers::razorpay::create_order,
        crate::handlers::razorpay::verify_payment,
        crate::handlers::razorpay::refund_payment,
        crate::handlers::razorpay::razorpay_webhook,
        crate::handlers::shipping::create_shipment,
        crate::handlers::shipping::ship_order,
        crate::handlers::shipping::bulk_create_shipments,
        crate::handlers::shipping::bulk_ship_orders,
        crate::handlers::shipping::track_shipment,
        crate::handlers::shipping::shipping_rates,
        crate::handlers::shipping::pickup_locations,
        crate::handlers::shipping::add_pickup_location,
        crate::handlers::shipping::shiprocket_webhook,
        crate::handlers::settings::get_settings,
        crate::handlers::settings::update_settings,
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration and login"),
        (name = "catalog", description = "Products and categories"),
        (name = "orders", description = "Order lifecycle"),
        (name = "payments", description = "Stripe payment capture"),
        (name = "razorpay", description = "Razorpay payment capture"),
        (name = "shipping", description = "Shiprocket shipments and tracking"),
        (name = "settings", description = "Store settings")
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at `/docs`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}

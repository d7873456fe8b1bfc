pub mod admin;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod printful_webhooks;
pub mod products;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::repositories::OrderRepository;
use crate::services::checkout::CheckoutService;
use crate::services::printful_integration::FulfillmentGateway;
use crate::services::reconciler::OrderReconciler;
use crate::services::stripe_integration::PaymentGateway;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: OrderRepository,
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<OrderReconciler>,
    pub fulfillment: Arc<dyn FulfillmentGateway>,
}

impl AppServices {
    /// Wires the services around the given vendor gateways.
    ///
    /// Production passes the HTTP clients; tests pass in-memory fakes.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        payments: Arc<dyn PaymentGateway>,
        fulfillment: Arc<dyn FulfillmentGateway>,
    ) -> Self {
        let orders = OrderRepository::new(db_pool);
        let reconciler = Arc::new(OrderReconciler::new(
            orders.clone(),
            fulfillment.clone(),
            config.stripe_webhook_secret.clone(),
            config.stripe_webhook_tolerance_secs,
            // A claim outlives any single Printful call before it counts as abandoned
            config.external_call_timeout() * 2,
        ));
        let checkout = Arc::new(CheckoutService::new(payments, reconciler.clone(), config));

        Self {
            orders,
            checkout,
            reconciler,
            fulfillment,
        }
    }
}

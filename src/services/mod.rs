// Vendor adapters
pub mod printful_integration;
pub mod stripe_integration;

// Order lifecycle
pub mod checkout;
pub mod order_status;
pub mod reconciler;
pub mod session_metadata;

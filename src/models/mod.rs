// Storefront domain values shared by the HTTP layer, services and the store
pub mod address;
pub mod cart;
pub mod identity;

pub use address::ShippingAddress;
pub use cart::{CartItem, OrderLine, ShippingOption};
pub use identity::BuyerIdentity;

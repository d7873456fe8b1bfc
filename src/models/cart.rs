use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// A line in the browser-side cart, as posted to checkout.
///
/// `variant_id` is the Printful sync variant; `price` is the unit price in
/// minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    #[validate(range(min = 1))]
    pub variant_id: i64,
    #[validate(length(min = 1, max = 250))]
    pub name: String,
    #[validate(range(min = 1, max = 100))]
    pub quantity: u32,
    #[validate(range(min = 1))]
    pub price: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(url)]
    pub image: Option<String>,
}

impl CartItem {
    pub fn line_total(&self) -> i64 {
        self.price.saturating_mul(i64::from(self.quantity))
    }

    pub fn to_order_line(&self) -> OrderLine {
        OrderLine {
            variant_id: self.variant_id,
            quantity: self.quantity,
        }
    }
}

/// What an order needs to know about a line to fulfil it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub variant_id: i64,
    pub quantity: u32,
}

/// A carrier option quoted by Printful for a destination and cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingOption {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    #[validate(length(min = 1, max = 250))]
    pub name: String,
    /// Minor units
    #[validate(range(min = 0))]
    pub rate: i64,
    #[validate(length(equal = 3))]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_delivery_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delivery_days: Option<u32>,
}

/// Sum of the cart's line totals, or `None` on overflow.
pub fn cart_subtotal(items: &[CartItem]) -> Option<i64> {
    items
        .iter()
        .try_fold(0i64, |acc, item| {
            item.price
                .checked_mul(i64::from(item.quantity))
                .and_then(|line| acc.checked_add(line))
        })
}

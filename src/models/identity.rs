use crate::entities::order;
use serde::Deserialize;
use utoipa::IntoParams;

/// Who is asking for order history: a public-key identity, an email, or both.
///
/// Matching is exact; an order belongs to the caller when either identifier
/// equals the one stored on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BuyerIdentity {
    pub pubkey: Option<String>,
    pub email: Option<String>,
}

impl BuyerIdentity {
    pub fn new(pubkey: Option<String>, email: Option<String>) -> Self {
        Self {
            pubkey: pubkey.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
            email: email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pubkey.is_none() && self.email.is_none()
    }

    pub fn owns(&self, order: &order::Model) -> bool {
        let pubkey_match = matches!(
            (&self.pubkey, &order.pubkey),
            (Some(mine), Some(theirs)) if mine == theirs
        );
        let email_match = matches!(
            (&self.email, &order.email),
            (Some(mine), Some(theirs)) if mine == theirs
        );
        pubkey_match || email_match
    }
}

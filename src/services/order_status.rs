//! Internal order status and the Printful status vocabulary mapped onto it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use utoipa::openapi::schema::{ObjectBuilder, Schema, Type};
use utoipa::openapi::RefOr;
use utoipa::{PartialSchema, ToSchema};

/// Lifecycle status of an [`crate::entities::order::Model`].
///
/// `Pending` only exists between claiming a checkout session in the store and
/// hearing back from Printful. Statuses Printful may add in the future are
/// carried through as `Unrecognized` instead of being rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    PrintfulDraft,
    PrintfulPending,
    InProduction,
    Shipped,
    Delivered,
    Failed,
    Canceled,
    Unrecognized(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::PrintfulDraft => "printful_draft",
            Self::PrintfulPending => "printful_pending",
            Self::InProduction => "in_production",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Unrecognized(raw) => raw.as_str(),
        }
    }

    /// Parses a stored status string. Never fails: unknown strings come back as `Unrecognized`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => Self::Pending,
            "printful_draft" => Self::PrintfulDraft,
            "printful_pending" => Self::PrintfulPending,
            "in_production" => Self::InProduction,
            "shipped" => Self::Shipped,
            "delivered" => Self::Delivered,
            "failed" => Self::Failed,
            "canceled" => Self::Canceled,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Maps a Printful order status onto the internal vocabulary.
    pub fn from_printful(vendor_status: &str) -> Self {
        match vendor_status {
            "draft" => Self::PrintfulDraft,
            "pending" | "onhold" => Self::PrintfulPending,
            "inprocess" | "partial" => Self::InProduction,
            "fulfilled" => Self::Shipped,
            "failed" => Self::Failed,
            "canceled" => Self::Canceled,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Terminal for this system; vendor re-opens are not modeled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Shipped | Self::Delivered | Self::Failed | Self::Canceled
        )
    }

    /// Whether moving from `self` to `next` is accepted.
    ///
    /// Non-terminal states may move anywhere. Terminal states only allow
    /// `shipped -> delivered`.
    pub fn can_transition_to(&self, next: &OrderStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Shipped => matches!(next, Self::Delivered),
            s if s.is_terminal() => false,
            _ => true,
        }
    }

    /// The status an order should end up in when `next` is reported while in `self`.
    pub fn resolve(&self, next: OrderStatus) -> OrderStatus {
        if self.can_transition_to(&next) {
            next
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for OrderStatus {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

// Documented as a plain string: vendor statuses outside the known set are stored verbatim
impl PartialSchema for OrderStatus {
    fn schema() -> RefOr<Schema> {
        RefOr::T(Schema::Object(
            ObjectBuilder::new()
                .schema_type(Type::String)
                .description(Some("Order lifecycle status, e.g. `printful_draft`"))
                .build(),
        ))
    }
}

impl ToSchema for OrderStatus {}

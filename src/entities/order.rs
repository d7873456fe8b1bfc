use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One checkout-to-fulfillment lifecycle.
///
/// `status` holds the wire string of [`crate::services::order_status::OrderStatus`];
/// it is a plain string column so vendor statuses this code does not know yet
/// can be stored verbatim.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub stripe_session_id: String,
    pub stripe_payment_intent_id: Option<String>,
    pub printful_order_id: Option<i64>,
    pub printful_external_id: Option<String>,

    pub pubkey: Option<String>,
    pub email: Option<String>,

    pub items: Json,
    pub shipping_address: Json,
    pub shipping_method: Option<String>,
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub tax: i64,
    pub total: i64,
    pub currency: String,
    pub live_mode: bool,

    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
    pub error_message: Option<String>,
    pub printful_error: Option<Json>,

    pub status: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_event::Entity")]
    OrderEvents,
}

impl Related<super::order_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderEvents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

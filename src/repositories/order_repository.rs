use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict}, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as Order, Model as OrderModel,
};
use crate::entities::order_event::{
    ActiveModel as OrderEventActiveModel, Column as EventColumn, Entity as OrderEvent,
    Model as OrderEventModel,
};
use crate::errors::AppError;
use crate::models::{BuyerIdentity, OrderLine, ShippingAddress};
use crate::repositories::Repository;
use crate::services::order_status::OrderStatus;

use super::BaseRepository;

/// Which side of the integration produced an order event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Stripe,
    Printful,
    /// Browser-driven confirmation after the Stripe redirect
    Checkout,
    Operator,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Printful => "printful",
            Self::Checkout => "checkout_confirm",
            Self::Operator => "operator",
        }
    }
}

/// Everything known about an order at the moment its payment is confirmed
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub stripe_session_id: String,
    pub stripe_payment_intent_id: Option<String>,
    pub printful_external_id: Option<String>,
    pub pubkey: Option<String>,
    pub email: Option<String>,
    pub items: Vec<OrderLine>,
    pub shipping_address: ShippingAddress,
    pub shipping_method: Option<String>,
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub tax: i64,
    pub total: i64,
    pub currency: String,
    pub live_mode: bool,
    pub status: OrderStatus,
}

/// Optional field changes applied together with a status change.
/// `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    pub stripe_payment_intent_id: Option<String>,
    pub printful_order_id: Option<i64>,
    pub printful_external_id: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
    pub error_message: Option<String>,
    pub printful_error: Option<Value>,
}

/// Durable store for orders and their audit events
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    fn active_model(id: Uuid, order: NewOrder) -> Result<OrderActiveModel, AppError> {
        let now = Utc::now();
        Ok(OrderActiveModel {
            id: Set(id),
            stripe_session_id: Set(order.stripe_session_id),
            stripe_payment_intent_id: Set(order.stripe_payment_intent_id),
            printful_order_id: Set(None),
            printful_external_id: Set(order.printful_external_id),
            pubkey: Set(order.pubkey),
            email: Set(order.email),
            items: Set(serde_json::to_value(&order.items)?),
            shipping_address: Set(serde_json::to_value(&order.shipping_address)?),
            shipping_method: Set(order.shipping_method),
            subtotal: Set(order.subtotal),
            shipping_cost: Set(order.shipping_cost),
            tax: Set(order.tax),
            total: Set(order.total),
            currency: Set(order.currency),
            live_mode: Set(order.live_mode),
            tracking_number: Set(None),
            tracking_url: Set(None),
            carrier: Set(None),
            error_message: Set(None),
            printful_error: Set(None),
            status: Set(order.status.as_str().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            paid_at: Set(Some(now)),
            shipped_at: Set(None),
            delivered_at: Set(None),
        })
    }

    /// Inserts an order unconditionally. A second insert for the same
    /// checkout session fails on the unique index.
    #[instrument(skip(self, order), fields(session_id = %order.stripe_session_id))]
    pub async fn insert_order(&self, order: NewOrder) -> Result<OrderModel, AppError> {
        let model = Self::active_model(Uuid::new_v4(), order)?;
        Ok(model.insert(self.base.get_db()).await?)
    }

    /// Inserts the order only if no order exists for its checkout session.
    ///
    /// Returns `None` when another delivery already claimed the session. The
    /// check and the insert are a single statement, so concurrent callers
    /// cannot both win.
    #[instrument(skip(self, order), fields(session_id = %order.stripe_session_id))]
    pub async fn claim_session(&self, order: NewOrder) -> Result<Option<OrderModel>, AppError> {
        let id = Uuid::new_v4();
        let model = Self::active_model(id, order)?;

        let inserted = Order::insert(model)
            .on_conflict(
                OnConflict::column(Column::StripeSessionId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.base.get_db())
            .await?;

        if inserted == 0 {
            debug!("checkout session already claimed");
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Takes over a `pending` claim whose last write is older than `stale_before`.
    ///
    /// Returns `None` when the order moved on or another caller took it over
    /// first. Refreshing `updated_at` is what makes the takeover exclusive.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn reclaim_stale_claim(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<OrderModel>, AppError> {
        let result = Order::update_many()
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(OrderStatus::Pending.as_str()))
            .filter(Column::UpdatedAt.lt(stale_before))
            .exec(self.base.get_db())
            .await?;

        if result.rows_affected == 0 {
            debug!("claim is not stale or was taken over");
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, AppError> {
        Ok(Order::find_by_id(id).one(self.base.get_db()).await?)
    }

    pub async fn find_order_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderModel>, AppError> {
        Ok(Order::find()
            .filter(Column::StripeSessionId.eq(session_id))
            .one(self.base.get_db())
            .await?)
    }

    pub async fn find_order_by_fulfillment_id(
        &self,
        printful_order_id: i64,
    ) -> Result<Option<OrderModel>, AppError> {
        Ok(Order::find()
            .filter(Column::PrintfulOrderId.eq(printful_order_id))
            .one(self.base.get_db())
            .await?)
    }

    /// Sets the status, applies `changes`, and refreshes `updated_at`.
    ///
    /// `shipped_at` and `delivered_at` are stamped the first time the order
    /// reaches the matching status.
    #[instrument(skip(self, changes), fields(order_id = %id, status = %status))]
    pub async fn update_order_status(
        &self,
        id: Uuid,
        status: &OrderStatus,
        changes: OrderUpdate,
    ) -> Result<OrderModel, AppError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {}", id)))?;

        let now = Utc::now();
        let shipped_at = existing.shipped_at;
        let delivered_at = existing.delivered_at;
        let mut model: OrderActiveModel = existing.into();

        model.status = Set(status.as_str().to_string());
        model.updated_at = Set(now);
        if matches!(status, OrderStatus::Shipped) && shipped_at.is_none() {
            model.shipped_at = Set(Some(now));
        }
        if matches!(status, OrderStatus::Delivered) && delivered_at.is_none() {
            model.delivered_at = Set(Some(now));
        }

        if let Some(v) = changes.stripe_payment_intent_id {
            model.stripe_payment_intent_id = Set(Some(v));
        }
        if let Some(v) = changes.printful_order_id {
            model.printful_order_id = Set(Some(v));
        }
        if let Some(v) = changes.printful_external_id {
            model.printful_external_id = Set(Some(v));
        }
        if let Some(v) = changes.tracking_number {
            model.tracking_number = Set(Some(v));
        }
        if let Some(v) = changes.tracking_url {
            model.tracking_url = Set(Some(v));
        }
        if let Some(v) = changes.carrier {
            model.carrier = Set(Some(v));
        }
        if let Some(v) = changes.error_message {
            model.error_message = Set(Some(v));
        }
        if let Some(v) = changes.printful_error {
            model.printful_error = Set(Some(v));
        }

        Ok(model.update(self.base.get_db()).await?)
    }

    /// Appends an audit entry. Events are never updated or removed.
    pub async fn append_event(
        &self,
        order_id: Uuid,
        event_type: &str,
        source: EventSource,
        status: &OrderStatus,
        payload: Value,
    ) -> Result<OrderEventModel, AppError> {
        let event = OrderEventActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            event_type: Set(event_type.to_string()),
            source: Set(source.as_str().to_string()),
            status: Set(status.as_str().to_string()),
            payload: Set(payload),
            created_at: Set(Utc::now()),
        };
        Ok(event.insert(self.base.get_db()).await?)
    }

    /// Orders whose pubkey or email matches the caller, newest first.
    /// An empty identity matches nothing.
    pub async fn list_orders_for_user(
        &self,
        identity: &BuyerIdentity,
    ) -> Result<Vec<OrderModel>, AppError> {
        if identity.is_empty() {
            return Ok(Vec::new());
        }

        let ownership = Condition::any()
            .add_option(identity.pubkey.as_deref().map(|p| Column::Pubkey.eq(p)))
            .add_option(identity.email.as_deref().map(|e| Column::Email.eq(e)));

        Ok(Order::find()
            .filter(ownership)
            .order_by_desc(Column::CreatedAt)
            .all(self.base.get_db())
            .await?)
    }

    /// An order with its events in chronological order.
    ///
    /// Fails with `Forbidden` when the order exists but belongs to someone
    /// else. Both errors carry the same text so callers cannot tell them apart.
    pub async fn get_order_with_events(
        &self,
        id: Uuid,
        identity: &BuyerIdentity,
    ) -> Result<(OrderModel, Vec<OrderEventModel>), AppError> {
        let order = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("order".into()))?;

        if !identity.owns(&order) {
            debug!(order_id = %id, "order requested by someone else");
            return Err(AppError::Forbidden("order".into()));
        }

        let events = self.events_for_order(id).await?;
        Ok((order, events))
    }

    pub async fn events_for_order(&self, order_id: Uuid) -> Result<Vec<OrderEventModel>, AppError> {
        Ok(OrderEvent::find()
            .filter(EventColumn::OrderId.eq(order_id))
            .order_by_asc(EventColumn::CreatedAt)
            .all(self.base.get_db())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use assert_matches::assert_matches;
    use serde_json::json;

    async fn repo() -> OrderRepository {
        let config = DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let db = establish_connection_with_config(&config).await.unwrap();
        run_migrations(&db).await.unwrap();
        OrderRepository::new(Arc::new(db))
    }

    fn new_order(session: &str, pubkey: Option<&str>, email: Option<&str>) -> NewOrder {
        NewOrder {
            stripe_session_id: session.into(),
            stripe_payment_intent_id: Some("pi_123".into()),
            printful_external_id: None,
            pubkey: pubkey.map(Into::into),
            email: email.map(Into::into),
            items: vec![OrderLine {
                variant_id: 4011,
                quantity: 2,
            }],
            shipping_address: ShippingAddress {
                name: "Ada Lovelace".into(),
                address1: "12 Analytical Way".into(),
                address2: None,
                city: "London".into(),
                state_code: None,
                country_code: "GB".into(),
                zip: "N1 7AA".into(),
                phone: None,
                email: email.map(Into::into),
            },
            shipping_method: Some("STANDARD".into()),
            subtotal: 3500,
            shipping_cost: 500,
            tax: 0,
            total: 4000,
            currency: "USD".into(),
            live_mode: false,
            status: OrderStatus::Pending,
        }
    }

    #[tokio::test]
    async fn second_claim_for_same_session_loses() {
        let repo = repo().await;
        let first = repo
            .claim_session(new_order("cs_test_1", None, Some("a@example.org")))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = repo
            .claim_session(new_order("cs_test_1", None, Some("a@example.org")))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn plain_insert_rejects_duplicate_session() {
        let repo = repo().await;
        repo.insert_order(new_order("cs_dup", None, None)).await.unwrap();
        let err = repo
            .insert_order(new_order("cs_dup", None, None))
            .await
            .unwrap_err();
        assert_matches!(err, AppError::DatabaseError(_));
    }

    #[tokio::test]
    async fn status_update_stamps_shipped_at_once() {
        let repo = repo().await;
        let order = repo.insert_order(new_order("cs_ship", None, None)).await.unwrap();

        let shipped = repo
            .update_order_status(
                order.id,
                &OrderStatus::Shipped,
                OrderUpdate {
                    tracking_number: Some("1Z999".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let first_stamp = shipped.shipped_at.unwrap();
        assert_eq!(shipped.tracking_number.as_deref(), Some("1Z999"));

        let again = repo
            .update_order_status(order.id, &OrderStatus::Shipped, OrderUpdate::default())
            .await
            .unwrap();
        assert_eq!(again.shipped_at, Some(first_stamp));
        assert_eq!(again.tracking_number.as_deref(), Some("1Z999"));
        assert!(again.updated_at >= shipped.updated_at);
    }

    #[tokio::test]
    async fn update_of_missing_order_is_not_found() {
        let repo = repo().await;
        let err = repo
            .update_order_status(Uuid::new_v4(), &OrderStatus::Failed, OrderUpdate::default())
            .await
            .unwrap_err();
        assert_matches!(err, AppError::NotFound(_));
    }

    #[tokio::test]
    async fn listing_matches_pubkey_or_email() {
        let repo = repo().await;
        repo.insert_order(new_order("cs_a", Some("npub_a"), None)).await.unwrap();
        repo.insert_order(new_order("cs_b", None, Some("b@example.org"))).await.unwrap();
        repo.insert_order(new_order("cs_c", Some("npub_c"), Some("c@example.org")))
            .await
            .unwrap();

        let by_key = repo
            .list_orders_for_user(&BuyerIdentity::new(Some("npub_a".into()), None))
            .await
            .unwrap();
        assert_eq!(by_key.len(), 1);
        assert_eq!(by_key[0].stripe_session_id, "cs_a");

        let either = repo
            .list_orders_for_user(&BuyerIdentity::new(
                Some("npub_a".into()),
                Some("b@example.org".into()),
            ))
            .await
            .unwrap();
        assert_eq!(either.len(), 2);

        let nobody = repo
            .list_orders_for_user(&BuyerIdentity::default())
            .await
            .unwrap();
        assert!(nobody.is_empty());
    }

    #[tokio::test]
    async fn foreign_order_is_forbidden() {
        let repo = repo().await;
        let order = repo
            .insert_order(new_order("cs_own", Some("npub_owner"), None))
            .await
            .unwrap();
        repo.append_event(
            order.id,
            "checkout.session.completed",
            EventSource::Stripe,
            &OrderStatus::Pending,
            json!({"id": "evt_1"}),
        )
        .await
        .unwrap();

        let (found, events) = repo
            .get_order_with_events(order.id, &BuyerIdentity::new(Some("npub_owner".into()), None))
            .await
            .unwrap();
        assert_eq!(found.id, order.id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "stripe");

        let err = repo
            .get_order_with_events(order.id, &BuyerIdentity::new(Some("npub_other".into()), None))
            .await
            .unwrap_err();
        assert_matches!(err, AppError::Forbidden(_));
    }
    #[tokio::test]
    async fn only_one_caller_takes_over_a_stale_claim() {
        let repo = repo().await;
        let order = repo
            .claim_session(new_order("cs_stale", None, None))
            .await
            .unwrap()
            .unwrap();

        let too_early = order.updated_at - chrono::Duration::seconds(1);
        assert!(repo.reclaim_stale_claim(order.id, too_early).await.unwrap().is_none());

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let taken = repo.reclaim_stale_claim(order.id, cutoff).await.unwrap();
        assert_eq!(taken.map(|o| o.id), Some(order.id));

        // The takeover refreshed updated_at, so a racing caller with an older cutoff loses
        assert!(repo.reclaim_stale_claim(order.id, order.updated_at).await.unwrap().is_none());

        repo.update_order_status(order.id, &OrderStatus::Failed, OrderUpdate::default())
            .await
            .unwrap();
        let later = Utc::now() + chrono::Duration::minutes(5);
        assert!(repo.reclaim_stale_claim(order.id, later).await.unwrap().is_none());
    }
}

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_orders_table::Migration),
            Box::new(m20250301_000002_create_order_events_table::Migration),
        ]
    }
}

mod m20250301_000001_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create orders table aligned with entities::order Model
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::StripeSessionId).string().not_null())
                        .col(ColumnDef::new(Orders::StripePaymentIntentId).string().null())
                        .col(ColumnDef::new(Orders::PrintfulOrderId).big_integer().null())
                        .col(ColumnDef::new(Orders::PrintfulExternalId).string().null())
                        .col(ColumnDef::new(Orders::Pubkey).string().null())
                        .col(ColumnDef::new(Orders::Email).string().null())
                        .col(ColumnDef::new(Orders::Items).json_binary().not_null())
                        .col(ColumnDef::new(Orders::ShippingAddress).json_binary().not_null())
                        .col(ColumnDef::new(Orders::ShippingMethod).string().null())
                        .col(
                            ColumnDef::new(Orders::Subtotal)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingCost)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::Tax)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::Total)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Currency).string().not_null())
                        .col(
                            ColumnDef::new(Orders::LiveMode)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::TrackingNumber).string().null())
                        .col(ColumnDef::new(Orders::TrackingUrl).string().null())
                        .col(ColumnDef::new(Orders::Carrier).string().null())
                        .col(ColumnDef::new(Orders::ErrorMessage).text().null())
                        .col(ColumnDef::new(Orders::PrintfulError).json_binary().null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::PaidAt).timestamp_with_time_zone().null())
                        .col(
                            ColumnDef::new(Orders::ShippedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::DeliveredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One order per checkout session; the reconciler's claim insert relies on it
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_orders_stripe_session_id")
                        .table(Orders::Table)
                        .col(Orders::StripeSessionId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_printful_order_id")
                        .table(Orders::Table)
                        .col(Orders::PrintfulOrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_pubkey")
                        .table(Orders::Table)
                        .col(Orders::Pubkey)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_email")
                        .table(Orders::Table)
                        .col(Orders::Email)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        StripeSessionId,
        StripePaymentIntentId,
        PrintfulOrderId,
        PrintfulExternalId,
        Pubkey,
        Email,
        Items,
        ShippingAddress,
        ShippingMethod,
        Subtotal,
        ShippingCost,
        Tax,
        Total,
        Currency,
        LiveMode,
        TrackingNumber,
        TrackingUrl,
        Carrier,
        ErrorMessage,
        PrintfulError,
        Status,
        CreatedAt,
        UpdatedAt,
        PaidAt,
        ShippedAt,
        DeliveredAt,
    }
}

mod m20250301_000002_create_order_events_table {

    use super::m20250301_000001_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_order_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderEvents::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderEvents::EventType).string().not_null())
                        .col(ColumnDef::new(OrderEvents::Source).string().not_null())
                        .col(ColumnDef::new(OrderEvents::Status).string().not_null())
                        .col(ColumnDef::new(OrderEvents::Payload).json_binary().not_null())
                        .col(
                            ColumnDef::new(OrderEvents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_events_order_id")
                                .from(OrderEvents::Table, OrderEvents::OrderId)
                                .to(Orders::Table, Orders::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_events_order_id_created_at")
                        .table(OrderEvents::Table)
                        .col(OrderEvents::OrderId)
                        .col(OrderEvents::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderEvents {
        Table,
        Id,
        OrderId,
        EventType,
        Source,
        Status,
        Payload,
        CreatedAt,
    }
}

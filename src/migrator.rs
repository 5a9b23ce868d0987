use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_medicines_table::Migration),
            Box::new(m20240301_000002_create_inventory_batches_table::Migration),
            Box::new(m20240301_000003_create_stock_movements_table::Migration),
            Box::new(m20240301_000004_create_sales_tables::Migration),
            Box::new(m20240301_000005_create_reservations_tables::Migration),
            Box::new(m20240301_000006_create_reorders_tables::Migration),
        ]
    }
}

mod m20240301_000001_create_medicines_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_medicines_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Medicines::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Medicines::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Medicines::StoreId).uuid().not_null())
                        .col(ColumnDef::new(Medicines::Name).string().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_medicines_store_id")
                        .table(Medicines::Table)
                        .col(Medicines::StoreId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Medicines::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Medicines {
        Table,
        Id,
        StoreId,
        Name,
    }
}

mod m20240301_000002_create_inventory_batches_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_inventory_batches_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryBatches::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryBatches::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryBatches::StoreId).uuid().not_null())
                        .col(ColumnDef::new(InventoryBatches::MedicineId).uuid().not_null())
                        .col(ColumnDef::new(InventoryBatches::BatchNumber).string().null())
                        .col(ColumnDef::new(InventoryBatches::ExpiryDate).date().null())
                        .col(
                            ColumnDef::new(InventoryBatches::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::QtyReceived)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::QtyAvailable)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::QtyReserved)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::PurchasePrice)
                                .decimal_len(12, 2)
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryBatches::Mrp).decimal_len(12, 2).null())
                        .col(ColumnDef::new(InventoryBatches::Location).string().null())
                        .col(
                            ColumnDef::new(InventoryBatches::Version)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryBatches::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // FEFO candidate lookup
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_batches_store_medicine")
                        .table(InventoryBatches::Table)
                        .col(InventoryBatches::StoreId)
                        .col(InventoryBatches::MedicineId)
                        .to_owned(),
                )
                .await?;

            // Receiving matches existing batches by number
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_batches_batch_number")
                        .table(InventoryBatches::Table)
                        .col(InventoryBatches::StoreId)
                        .col(InventoryBatches::BatchNumber)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryBatches::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryBatches {
        Table,
        Id,
        StoreId,
        MedicineId,
        BatchNumber,
        ExpiryDate,
        ReceivedAt,
        QtyReceived,
        QtyAvailable,
        QtyReserved,
        PurchasePrice,
        Mrp,
        Location,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_stock_movements_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::StoreId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::BatchId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::MedicineId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::Delta).integer().not_null())
                        .col(ColumnDef::new(StockMovements::Reason).string_len(20).not_null())
                        .col(ColumnDef::new(StockMovements::Note).string().null())
                        .col(ColumnDef::new(StockMovements::PerformedBy).uuid().null())
                        .col(ColumnDef::new(StockMovements::SaleItemId).uuid().null())
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_batch_id")
                        .table(StockMovements::Table)
                        .col(StockMovements::StoreId)
                        .col(StockMovements::BatchId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_sale_item_id")
                        .table(StockMovements::Table)
                        .col(StockMovements::SaleItemId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockMovements {
        Table,
        Id,
        StoreId,
        BatchId,
        MedicineId,
        Delta,
        Reason,
        Note,
        PerformedBy,
        SaleItemId,
        CreatedAt,
    }
}

mod m20240301_000004_create_sales_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_sales_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Sales::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Sales::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Sales::StoreId).uuid().not_null())
                        .col(
                            ColumnDef::new(Sales::Subtotal)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Sales::Tax).decimal_len(12, 2).not_null().default(0))
                        .col(
                            ColumnDef::new(Sales::Discounts)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Sales::TotalValue)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Sales::PaymentStatus).string_len(20).not_null())
                        .col(ColumnDef::new(Sales::PaymentMethod).string_len(20).null())
                        .col(ColumnDef::new(Sales::ExternalRef).string().null())
                        .col(ColumnDef::new(Sales::CreatedBy).uuid().null())
                        .col(
                            ColumnDef::new(Sales::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Sales::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SaleItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(SaleItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(SaleItems::SaleId).uuid().not_null())
                        .col(ColumnDef::new(SaleItems::MedicineId).uuid().not_null())
                        .col(ColumnDef::new(SaleItems::BatchId).uuid().null())
                        .col(ColumnDef::new(SaleItems::Qty).integer().not_null())
                        .col(ColumnDef::new(SaleItems::UnitPrice).decimal_len(12, 2).null())
                        .col(ColumnDef::new(SaleItems::LineTotal).decimal_len(12, 2).null())
                        .col(
                            ColumnDef::new(SaleItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_items_sale_id")
                                .from(SaleItems::Table, SaleItems::SaleId)
                                .to(Sales::Table, Sales::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sale_items_sale_id")
                        .table(SaleItems::Table)
                        .col(SaleItems::SaleId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SaleItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Sales::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Sales {
        Table,
        Id,
        StoreId,
        Subtotal,
        Tax,
        Discounts,
        TotalValue,
        PaymentStatus,
        PaymentMethod,
        ExternalRef,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum SaleItems {
        Table,
        Id,
        SaleId,
        MedicineId,
        BatchId,
        Qty,
        UnitPrice,
        LineTotal,
        CreatedAt,
    }
}

mod m20240301_000005_create_reservations_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_reservations_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Reservations::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Reservations::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Reservations::StoreId).uuid().not_null())
                        .col(ColumnDef::new(Reservations::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Reservations::CreatedBy).uuid().null())
                        .col(
                            ColumnDef::new(Reservations::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Reservations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Reservations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ReservationItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReservationItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReservationItems::ReservationId).uuid().not_null())
                        .col(ColumnDef::new(ReservationItems::BatchId).uuid().not_null())
                        .col(ColumnDef::new(ReservationItems::MedicineId).uuid().not_null())
                        .col(ColumnDef::new(ReservationItems::Qty).integer().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_reservation_items_reservation_id")
                                .from(ReservationItems::Table, ReservationItems::ReservationId)
                                .to(Reservations::Table, Reservations::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_reservation_items_reservation_id")
                        .table(ReservationItems::Table)
                        .col(ReservationItems::ReservationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReservationItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Reservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Reservations {
        Table,
        Id,
        StoreId,
        Status,
        CreatedBy,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ReservationItems {
        Table,
        Id,
        ReservationId,
        BatchId,
        MedicineId,
        Qty,
    }
}

mod m20240301_000006_create_reorders_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_reorders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Reorders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Reorders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Reorders::StoreId).uuid().not_null())
                        .col(ColumnDef::new(Reorders::SupplierId).uuid().null())
                        .col(ColumnDef::new(Reorders::Status).string_len(24).not_null())
                        .col(
                            ColumnDef::new(Reorders::TotalValue)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Reorders::Note).string().null())
                        .col(ColumnDef::new(Reorders::ExternalRef).string().null())
                        .col(ColumnDef::new(Reorders::CreatedBy).uuid().null())
                        .col(
                            ColumnDef::new(Reorders::SentAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Reorders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Reorders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ReorderItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(ReorderItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(ReorderItems::ReorderId).uuid().not_null())
                        .col(ColumnDef::new(ReorderItems::MedicineId).uuid().not_null())
                        .col(ColumnDef::new(ReorderItems::Qty).integer().not_null())
                        .col(ColumnDef::new(ReorderItems::Price).decimal_len(12, 2).null())
                        .col(ColumnDef::new(ReorderItems::Sku).string().null())
                        .col(ColumnDef::new(ReorderItems::BatchPref).string().null())
                        .col(
                            ColumnDef::new(ReorderItems::QtyReceived)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_reorder_items_reorder_id")
                                .from(ReorderItems::Table, ReorderItems::ReorderId)
                                .to(Reorders::Table, Reorders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_reorder_items_reorder_id")
                        .table(ReorderItems::Table)
                        .col(ReorderItems::ReorderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReorderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Reorders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Reorders {
        Table,
        Id,
        StoreId,
        SupplierId,
        Status,
        TotalValue,
        Note,
        ExternalRef,
        CreatedBy,
        SentAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ReorderItems {
        Table,
        Id,
        ReorderId,
        MedicineId,
        Qty,
        Price,
        Sku,
        BatchPref,
        QtyReceived,
    }
}

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MonthlyPoints::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(MonthlyPoints::UserId).uuid().not_null())
                    .col(ColumnDef::new(MonthlyPoints::Period).string().not_null())
                    .col(
                        ColumnDef::new(MonthlyPoints::Point)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MonthlyPoints::Version)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .primary_key(
                        Index::create()
                            .col(MonthlyPoints::UserId)
                            .col(MonthlyPoints::Period),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MonthlyPoints::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MonthlyPoints {
    Table,
    UserId,
    Period,
    Point,
    Version,
}

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScoreEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScoreEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScoreEvents::UserId).uuid().not_null())
                    // Both nullable; legacy rows may be missing either one
                    .col(ColumnDef::new(ScoreEvents::Value).big_integer().null())
                    .col(ColumnDef::new(ScoreEvents::Timestamp).big_integer().null())
                    .to_owned(),
            )
            .await?;

        // Windowed sums scan one user's log at a time
        manager
            .create_index(
                Index::create()
                    .name("idx_score_events_user_id")
                    .table(ScoreEvents::Table)
                    .col(ScoreEvents::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ScoreEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ScoreEvents {
    Table,
    Id,
    UserId,
    Value,
    Timestamp,
}

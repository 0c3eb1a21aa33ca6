use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
pub(crate) enum Pipeline {
    Table,
    Id,
    Key,
    Name,
    CreatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum Stage {
    Table,
    Id,
    PipelineId,
    Key,
    Name,
    SortOrder,
    DeadlineHours,
    WipLimit,
    EnterRoles,
    ExitRoles,
    IsWon,
    IsLost,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Pipeline::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Pipeline::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Pipeline::Key)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Pipeline::Name).string_len(128).not_null())
                    .col(
                        ColumnDef::new(Pipeline::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Stage::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Stage::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Stage::PipelineId).uuid().not_null())
                    .col(ColumnDef::new(Stage::Key).string_len(64).not_null())
                    .col(ColumnDef::new(Stage::Name).string_len(128).not_null())
                    .col(ColumnDef::new(Stage::SortOrder).integer().not_null())
                    .col(
                        ColumnDef::new(Stage::DeadlineHours)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Stage::WipLimit).integer().null())
                    .col(ColumnDef::new(Stage::EnterRoles).json().null())
                    .col(ColumnDef::new(Stage::ExitRoles).json().null())
                    .col(
                        ColumnDef::new(Stage::IsWon)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Stage::IsLost)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Stage::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stage_pipeline")
                            .from(Stage::Table, Stage::PipelineId)
                            .to(Pipeline::Table, Pipeline::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stage_pipeline_order")
                    .table(Stage::Table)
                    .col(Stage::PipelineId)
                    .col(Stage::SortOrder)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stage_pipeline_key")
                    .table(Stage::Table)
                    .col(Stage::PipelineId)
                    .col(Stage::Key)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Stage::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Pipeline::Table).to_owned())
            .await
    }
}

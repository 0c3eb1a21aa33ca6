use sea_orm_migration::prelude::*;

use crate::m20250301_000001_pipeline_stage::{Pipeline, Stage};

#[derive(DeriveIden)]
enum User {
    Table,
    Id,
    Email,
    DisplayName,
    Role,
    IsActive,
    DistributionActive,
    MinLives,
    MaxLives,
    CnpjRule,
    LastAssignedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Lead {
    Table,
    Id,
    PipelineId,
    StageId,
    Name,
    Email,
    Phone,
    Company,
    Source,
    Status,
    Priority,
    Score,
    OwnerIds,
    Rank,
    Version,
    LivesCount,
    HasLegalEntity,
    EnteredStageAt,
    DueDate,
    IsOverdue,
    OverdueHours,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Activity {
    Table,
    Id,
    LeadId,
    Seq,
    Kind,
    Description,
    ActorId,
    Metadata,
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
                    .table(User::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(User::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(User::Email)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(User::DisplayName).string_len(128).not_null())
                    .col(
                        ColumnDef::new(User::Role)
                            .string_len(32)
                            .not_null()
                            .default("seller"),
                    )
                    .col(
                        ColumnDef::new(User::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(User::DistributionActive)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(User::MinLives).integer().null())
                    .col(ColumnDef::new(User::MaxLives).integer().null())
                    .col(ColumnDef::new(User::CnpjRule).string_len(16).null())
                    .col(
                        ColumnDef::new(User::LastAssignedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(User::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Lead::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Lead::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Lead::PipelineId).uuid().not_null())
                    .col(ColumnDef::new(Lead::StageId).uuid().not_null())
                    .col(ColumnDef::new(Lead::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Lead::Email).string_len(255).null())
                    .col(ColumnDef::new(Lead::Phone).string_len(64).null())
                    .col(ColumnDef::new(Lead::Company).string_len(255).null())
                    .col(ColumnDef::new(Lead::Source).string_len(64).null())
                    .col(
                        ColumnDef::new(Lead::Status)
                            .string_len(32)
                            .not_null()
                            .default("new"),
                    )
                    .col(
                        ColumnDef::new(Lead::Priority)
                            .string_len(16)
                            .not_null()
                            .default("medium"),
                    )
                    .col(ColumnDef::new(Lead::Score).integer().not_null().default(0))
                    .col(ColumnDef::new(Lead::OwnerIds).json().not_null())
                    .col(ColumnDef::new(Lead::Rank).string_len(255).not_null())
                    .col(ColumnDef::new(Lead::Version).integer().not_null().default(1))
                    .col(
                        ColumnDef::new(Lead::LivesCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Lead::HasLegalEntity)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Lead::EnteredStageAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Lead::DueDate).timestamp_with_time_zone().null())
                    .col(
                        ColumnDef::new(Lead::IsOverdue)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Lead::OverdueHours)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Lead::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Lead::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_lead_pipeline")
                            .from(Lead::Table, Lead::PipelineId)
                            .to(Pipeline::Table, Pipeline::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_lead_stage")
                            .from(Lead::Table, Lead::StageId)
                            .to(Stage::Table, Stage::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_lead_stage_rank")
                    .table(Lead::Table)
                    .col(Lead::StageId)
                    .col(Lead::Rank)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_lead_pipeline")
                    .table(Lead::Table)
                    .col(Lead::PipelineId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_lead_due_date")
                    .table(Lead::Table)
                    .col(Lead::DueDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Activity::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Activity::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Activity::LeadId).uuid().not_null())
                    .col(ColumnDef::new(Activity::Seq).integer().not_null())
                    .col(ColumnDef::new(Activity::Kind).string_len(32).not_null())
                    .col(ColumnDef::new(Activity::Description).text().not_null())
                    .col(ColumnDef::new(Activity::ActorId).uuid().null())
                    .col(ColumnDef::new(Activity::Metadata).json().not_null())
                    .col(
                        ColumnDef::new(Activity::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_activity_lead")
                            .from(Activity::Table, Activity::LeadId)
                            .to(Lead::Table, Lead::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_activity_lead_seq")
                    .table(Activity::Table)
                    .col(Activity::LeadId)
                    .col(Activity::Seq)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_activity_created")
                    .table(Activity::Table)
                    .col(Activity::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Activity::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Lead::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await
    }
}

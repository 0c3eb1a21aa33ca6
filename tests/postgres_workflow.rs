use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use crm::{
    ApiError, Crm, MoveCard, NewLead, NewStage, NoopNotifier, RequestContext, Role,
};
use entity::user::{self, CnpjRule};
use leadflow_tests::{migrated_pool, postgres_image};
use sea_orm::{ActiveModelTrait, Set};
use testcontainers::clients::Cli;
use uuid::Uuid;

async fn seller(crm_db: &sea_orm::DatabaseConnection, email: &str) -> Result<user::Model> {
    let model = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        display_name: Set(email.to_string()),
        role: Set("seller".to_string()),
        is_active: Set(true),
        distribution_active: Set(true),
        min_lives: Set(Some(1)),
        max_lives: Set(Some(50)),
        cnpj_rule: Set(Some(CnpjRule::Both)),
        last_assigned_at: Set(None),
        created_at: Set(Utc::now().into()),
    }
    .insert(crm_db)
    .await?;
    Ok(model)
}

#[tokio::test]
#[ignore = "needs a docker daemon"]
async fn lead_lifecycle_on_postgres() -> Result<()> {
    let docker = Cli::default();
    let container = docker.run(postgres_image());
    let pool = Arc::new(migrated_pool(container.get_host_port_ipv4(5432)).await?);
    let crm = Crm::new(pool.clone(), Arc::new(NoopNotifier));

    let pipeline = crm.stages.create_pipeline("sales", "Sales").await?;
    let new = crm
        .stages
        .create_stage(pipeline.id, NewStage::new("new", "New", 24))
        .await?;
    let qualified = crm
        .stages
        .create_stage(pipeline.id, NewStage::new("qualified", "Qualified", 2))
        .await?;
    let owner = seller(&pool, "ana@example.com").await?;

    let ingested = crm
        .intake
        .ingest_lead(
            &RequestContext::system(),
            NewLead::new(pipeline.id, "Acme", 5).email("buyer@acme.test"),
        )
        .await?;
    let lead = ingested.lead().clone();
    assert_eq!(lead.stage_id, new.id);
    assert_eq!(lead.primary_owner(), Some(owner.id));

    let seller_ctx = RequestContext::new(owner.id, Role::Seller);
    let moved = crm
        .kanban
        .move_card(
            &seller_ctx,
            MoveCard::new(lead.id, qualified.id).expect_version(lead.version),
        )
        .await?;
    assert_eq!(moved.stage_id, qualified.id);
    assert_eq!(moved.version, lead.version + 1);
    assert!(moved.due_date.is_some());

    let stale = crm
        .kanban
        .move_card(
            &seller_ctx,
            MoveCard::new(lead.id, new.id).expect_version(lead.version),
        )
        .await;
    assert!(matches!(stale, Err(ApiError::Conflict(_))));

    let later = Utc::now() + Duration::hours(5);
    let summary = crm.sla.update_all_overdue_leads_at(later).await?;
    assert_eq!((summary.total, summary.overdue, summary.updated), (1, 1, 1));

    let stats = crm.sla.sla_stats_by_pipeline_at(pipeline.id, later).await;
    assert_eq!(stats.overdue, 1);
    assert_eq!(crm.activity.count_for_lead(lead.id).await?, 3);
    Ok(())
}

#[tokio::test]
#[ignore = "needs a docker daemon"]
async fn concurrent_moves_with_same_version_admit_one_winner() -> Result<()> {
    let docker = Cli::default();
    let container = docker.run(postgres_image());
    let pool = Arc::new(migrated_pool(container.get_host_port_ipv4(5432)).await?);
    let crm = Crm::new(pool.clone(), Arc::new(NoopNotifier));

    let pipeline = crm.stages.create_pipeline("sales", "Sales").await?;
    let first = crm
        .stages
        .create_stage(pipeline.id, NewStage::new("new", "New", 24))
        .await?;
    let second = crm
        .stages
        .create_stage(pipeline.id, NewStage::new("call", "Call", 24))
        .await?;
    let third = crm
        .stages
        .create_stage(pipeline.id, NewStage::new("demo", "Demo", 24))
        .await?;
    let lead = crm
        .intake
        .ingest_lead(&RequestContext::system(), NewLead::new(pipeline.id, "Globex", 3))
        .await?
        .lead()
        .clone();
    assert_eq!(lead.stage_id, first.id);

    let ctx = RequestContext::system();
    let (a, b) = tokio::join!(
        crm.kanban
            .move_card(&ctx, MoveCard::new(lead.id, second.id).expect_version(lead.version)),
        crm.kanban
            .move_card(&ctx, MoveCard::new(lead.id, third.id).expect_version(lead.version)),
    );
    let winners = [a.is_ok(), b.is_ok()].into_iter().filter(|ok| *ok).count();
    assert_eq!(winners, 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(ApiError::Conflict(_))));
    Ok(())
}

mod common;

use chrono::Duration;
use common::{t0, Harness};
use crm::SweepSummary;
use uuid::Uuid;

#[tokio::test]
async fn calculate_due_date_restarts_the_window() {
    let h = Harness::new().await;
    let a = h.stage("a", 24).await;
    let lead = h.lead_in(&a, "Acme", &[]).await;
    let entered = t0() + Duration::hours(2);

    let due = h
        .crm
        .sla
        .calculate_due_date(lead.id, a.id, Some(entered))
        .await
        .unwrap();

    assert_eq!(due, Some((entered + Duration::hours(24)).into()));
    let stored = h.reload(lead.id).await;
    assert_eq!(stored.entered_stage_at, Some(entered.into()));
    assert_eq!(stored.due_date, due);
    assert!(!stored.is_overdue);
    assert_eq!(stored.version, lead.version);
}

#[tokio::test]
async fn stage_without_sla_leaves_the_lead_alone() {
    let h = Harness::new().await;
    let a = h.stage("a", 24).await;
    let open = h.stage("open", 0).await;
    let lead = h.lead_in(&a, "Acme", &[]).await;

    let due = h
        .crm
        .sla
        .calculate_due_date(lead.id, open.id, Some(t0() + Duration::hours(9)))
        .await
        .unwrap();

    assert_eq!(due, None);
    assert_eq!(h.reload(lead.id).await, lead);
}

#[tokio::test]
async fn check_overdue_is_idempotent() {
    let h = Harness::new().await;
    let a = h.stage("a", 24).await;
    let lead = h.lead_in(&a, "Acme", &[]).await;
    let now = t0() + Duration::hours(27) + Duration::minutes(40);

    let first = h.crm.sla.check_overdue_at(lead.id, now).await.unwrap();
    let after_first = h.reload(lead.id).await;
    let second = h.crm.sla.check_overdue_at(lead.id, now).await.unwrap();
    let after_second = h.reload(lead.id).await;

    assert!(first.is_overdue);
    assert_eq!(first.overdue_hours, 3);
    assert_eq!(first, second);
    assert!(after_first.is_overdue);
    assert_eq!(after_first.overdue_hours, 3);
    assert_eq!(after_first, after_second);
    assert_eq!(after_first.version, lead.version);
}

#[tokio::test]
async fn lead_at_its_due_instant_is_on_time() {
    let h = Harness::new().await;
    let a = h.stage("a", 24).await;
    let lead = h.lead_in(&a, "Acme", &[]).await;

    let status = h
        .crm
        .sla
        .check_overdue_at(lead.id, t0() + Duration::hours(24))
        .await
        .unwrap();

    assert!(!status.is_overdue);
    assert_eq!(status.hours_until_due, Some(0));
    assert!(!h.reload(lead.id).await.is_overdue);
}

#[tokio::test]
async fn check_overdue_on_unknown_lead_is_not_found() {
    let h = Harness::new().await;
    let err = h.crm.sla.check_overdue(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn sweep_writes_only_changed_leads() {
    let h = Harness::new().await;
    let fast = h.stage("fast", 4).await;
    let slow = h.stage("slow", 72).await;
    let open = h.stage("open", 0).await;
    h.lead_in(&fast, "late-1", &[]).await;
    h.lead_in(&fast, "late-2", &[]).await;
    h.lead_in(&slow, "fine", &[]).await;
    h.lead_in(&open, "untracked", &[]).await;
    let now = t0() + Duration::hours(10);

    let first = h.crm.sla.update_all_overdue_leads_at(now).await.unwrap();
    assert_eq!(
        first,
        SweepSummary {
            total: 3,
            overdue: 2,
            updated: 2
        }
    );

    let again = h.crm.sla.update_all_overdue_leads_at(now).await.unwrap();
    assert_eq!(again.updated, 0);
    assert_eq!(again.overdue, 2);

    // Another hour changes overdue_hours on both late leads.
    let later = h
        .crm
        .sla
        .update_all_overdue_leads_at(now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(later.updated, 2);
}

#[tokio::test]
async fn stats_split_leads_by_deadline_state() {
    let h = Harness::new().await;
    let fast = h.stage("fast", 4).await;
    let medium = h.stage("medium", 8).await;
    let slow = h.stage("slow", 72).await;
    let open = h.stage("open", 0).await;
    h.lead_in(&fast, "six-late", &[]).await;
    h.lead_in(&medium, "two-late", &[]).await;
    h.lead_in(&medium, "two-late-too", &[]).await;
    h.lead_in(&slow, "fine", &[]).await;
    h.lead_in(&open, "untracked", &[]).await;

    let stats = h
        .crm
        .sla
        .sla_stats_by_pipeline_at(h.pipeline.id, t0() + Duration::hours(10))
        .await;

    assert_eq!(stats.total, 5);
    assert_eq!(stats.overdue, 3);
    assert_eq!(stats.on_time, 1);
    assert_eq!(stats.no_sla, 1);
    assert_eq!(stats.avg_overdue_hours, 3.33);
}

#[tokio::test]
async fn stats_for_an_empty_pipeline_are_zero() {
    let h = Harness::new().await;
    let stats = h.crm.sla.sla_stats_by_pipeline(Uuid::new_v4()).await;
    assert_eq!(stats.total, 0);
    assert_eq!(stats.avg_overdue_hours, 0.0);
}

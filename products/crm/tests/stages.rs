mod common;

use common::Harness;
use crm::NewStage;
use uuid::Uuid;

#[tokio::test]
async fn stages_are_appended_in_order() {
    let h = Harness::new().await;
    let a = h.stage("a", 24).await;
    let b = h.stage("b", 48).await;

    assert_eq!((a.sort_order, b.sort_order), (1, 2));
    let first = h.crm.stages.first_stage(h.pipeline.id).await.unwrap();
    assert_eq!(first.map(|s| s.id), Some(a.id));
}

#[tokio::test]
async fn duplicate_keys_are_rejected() {
    let h = Harness::new().await;
    h.stage("a", 24).await;

    let err = h
        .crm
        .stages
        .create_stage(h.pipeline.id, NewStage::new("A", "Again", 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ARGUMENT");

    let err = h
        .crm
        .stages
        .create_pipeline("sales", "Sales again")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ARGUMENT");
}

#[tokio::test]
async fn stage_on_unknown_pipeline_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .crm
        .stages
        .create_stage(Uuid::new_v4(), NewStage::new("a", "A", 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn reorder_assigns_dense_orders() {
    let h = Harness::new().await;
    let s1 = h.stage("s1", 0).await;
    let s2 = h.stage("s2", 0).await;
    let s3 = h.stage("s3", 0).await;

    let reordered = h
        .crm
        .stages
        .reorder_stages(h.pipeline.id, &[s3.id, s1.id, s2.id])
        .await
        .unwrap();

    let orders: Vec<_> = reordered.iter().map(|s| (s.id, s.sort_order)).collect();
    assert_eq!(orders, vec![(s3.id, 1), (s1.id, 2), (s2.id, 3)]);
}

#[tokio::test]
async fn reorder_requires_a_permutation() {
    let h = Harness::new().await;
    let s1 = h.stage("s1", 0).await;
    let s2 = h.stage("s2", 0).await;
    let stages = &h.crm.stages;

    let missing = stages.reorder_stages(h.pipeline.id, &[s2.id]).await;
    assert_eq!(missing.unwrap_err().code(), "INVALID_ARGUMENT");

    let repeated = stages
        .reorder_stages(h.pipeline.id, &[s1.id, s1.id])
        .await;
    assert_eq!(repeated.unwrap_err().code(), "INVALID_ARGUMENT");

    let foreign = stages
        .reorder_stages(h.pipeline.id, &[s1.id, Uuid::new_v4()])
        .await;
    assert_eq!(foreign.unwrap_err().code(), "INVALID_ARGUMENT");

    let unknown = stages.reorder_stages(Uuid::new_v4(), &[s1.id, s2.id]).await;
    assert_eq!(unknown.unwrap_err().code(), "NOT_FOUND");

    let unchanged = stages.list_stages(h.pipeline.id).await.unwrap();
    assert_eq!(unchanged[0].id, s1.id);
}

#[tokio::test]
async fn occupied_stage_cannot_be_deleted() {
    let h = Harness::new().await;
    let a = h.stage("a", 0).await;
    let b = h.stage("b", 0).await;
    let c = h.stage("c", 0).await;
    h.lead_in(&b, "Acme", &[]).await;

    assert_eq!(h.crm.stages.count_leads_in_stage(b.id).await.unwrap(), 1);
    let err = h.crm.stages.delete_stage(b.id).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    assert_eq!(h.crm.stages.count_leads_in_stage(a.id).await.unwrap(), 0);
    h.crm.stages.delete_stage(a.id).await.unwrap();

    let remaining = h.crm.stages.list_stages(h.pipeline.id).await.unwrap();
    let orders: Vec<_> = remaining.iter().map(|s| (s.id, s.sort_order)).collect();
    assert_eq!(orders, vec![(b.id, 1), (c.id, 2)]);

    let err = h.crm.stages.delete_stage(a.id).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

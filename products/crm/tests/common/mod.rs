#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use crm::notify::RealtimeEvent;
use crm::rank::Rank;
use crm::sla::SlaWindow;
use crm::{ApiResult, CandidateFinder, Crm, NewStage, Notifier};
use entity::lead::{self, Priority, Status};
use entity::user::{self, CnpjRule};
use entity::{pipeline, stage};
use migration::{Migrator, MigratorTrait};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter,
};
use serde_json::Value;
use uuid::Uuid;

/// Monday 09:00 UTC, the instant most scenarios run at.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<RealtimeEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<RealtimeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn named(&self, event: &str) -> Vec<RealtimeEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event == event)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, channel: &str, event: &str, payload: Value) {
        self.events.lock().unwrap().push(RealtimeEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        });
    }
}

/// Always answers with the same candidate.
pub struct FixedFinder(pub Option<Uuid>);

#[async_trait]
impl CandidateFinder for FixedFinder {
    async fn find_next_responsible(
        &self,
        _lives_count: i32,
        _has_legal_entity: bool,
    ) -> ApiResult<Option<Uuid>> {
        Ok(self.0)
    }
}

pub struct Harness {
    pub db: Arc<DatabaseConnection>,
    pub crm: Crm,
    pub notifier: Arc<RecordingNotifier>,
    pub pipeline: pipeline::Model,
}

impl Harness {
    pub async fn new() -> Self {
        let db = connect().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let crm = Crm::new(db.clone(), notifier.clone());
        Self::finish(db, crm, notifier).await
    }

    pub async fn with_finder(finder: Arc<dyn CandidateFinder>) -> Self {
        let db = connect().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let crm = Crm::with_finder(db.clone(), notifier.clone(), finder);
        Self::finish(db, crm, notifier).await
    }

    async fn finish(
        db: Arc<DatabaseConnection>,
        crm: Crm,
        notifier: Arc<RecordingNotifier>,
    ) -> Self {
        let pipeline = crm
            .stages
            .create_pipeline("sales", "Sales")
            .await
            .expect("pipeline");
        Self {
            db,
            crm,
            notifier,
            pipeline,
        }
    }

    pub async fn stage(&self, key: &str, deadline_hours: i32) -> stage::Model {
        self.stage_with(NewStage::new(key, key.to_uppercase(), deadline_hours))
            .await
    }

    pub async fn stage_with(&self, input: NewStage) -> stage::Model {
        self.crm
            .stages
            .create_stage(self.pipeline.id, input)
            .await
            .expect("stage")
    }

    /// Appends a lead at the bottom of `stage`, entered at `t0()`.
    pub async fn lead_in(&self, stage: &stage::Model, name: &str, owners: &[Uuid]) -> lead::Model {
        let existing = lead::Entity::find()
            .filter(lead::Column::StageId.eq(stage.id))
            .all(self.db.as_ref())
            .await
            .unwrap();
        let last = existing
            .iter()
            .filter_map(|l| Rank::parse(&l.rank))
            .max();
        let stamp: DateTimeWithTimeZone = t0().into();
        let window = SlaWindow::open(stage, stamp);
        lead::ActiveModel {
            id: Set(Uuid::new_v4()),
            pipeline_id: Set(stage.pipeline_id),
            stage_id: Set(stage.id),
            name: Set(name.to_string()),
            email: Set(None),
            phone: Set(None),
            company: Set(None),
            source: Set(None),
            status: Set(Status::New),
            priority: Set(Priority::Medium),
            score: Set(0),
            owner_ids: Set(lead::owners_to_json(owners)),
            rank: Set(last.map_or_else(Rank::initial, |last| last.after()).into_string()),
            version: Set(1),
            lives_count: Set(1),
            has_legal_entity: Set(false),
            entered_stage_at: Set(Some(window.entered_at)),
            due_date: Set(window.due_date),
            is_overdue: Set(false),
            overdue_hours: Set(0),
            created_at: Set(stamp),
            updated_at: Set(stamp),
        }
        .insert(self.db.as_ref())
        .await
        .unwrap()
    }

    pub async fn owner(&self, email: &str, min: i32, max: i32, rule: CnpjRule) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            display_name: Set(email.to_string()),
            role: Set("seller".to_string()),
            is_active: Set(true),
            distribution_active: Set(true),
            min_lives: Set(Some(min)),
            max_lives: Set(Some(max)),
            cnpj_rule: Set(Some(rule)),
            last_assigned_at: Set(None),
            created_at: Set(t0().into()),
        }
        .insert(self.db.as_ref())
        .await
        .unwrap()
    }

    pub async fn reload(&self, lead_id: Uuid) -> lead::Model {
        lead::Entity::find_by_id(lead_id)
            .one(self.db.as_ref())
            .await
            .unwrap()
            .expect("lead exists")
    }

    pub async fn activity_count(&self, lead_id: Uuid) -> u64 {
        self.crm.activity.count_for_lead(lead_id).await.unwrap()
    }
}

async fn connect() -> Arc<DatabaseConnection> {
    let conn = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&conn, None).await.unwrap();
    Arc::new(conn)
}

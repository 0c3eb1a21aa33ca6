//! Append-only audit trail shown on the lead timeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use entity::activity::{self, Kind};
use platform_api::ApiResult;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct NewActivity {
    pub lead_id: Uuid,
    pub kind: Kind,
    pub description: String,
    pub actor_id: Option<Uuid>,
    pub metadata: Value,
}

impl NewActivity {
    pub fn new(lead_id: Uuid, kind: Kind, description: impl Into<String>) -> Self {
        Self {
            lead_id,
            kind,
            description: description.into(),
            actor_id: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn by(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Appends one entry on whatever connection or transaction the caller holds,
/// so the entry commits or rolls back together with the change it describes.
///
/// Entries written in one transaction often share `at`; `seq` keeps their
/// order. Callers hold the lead row (versioned update or fresh insert) in the
/// same transaction, so two writers never race for the same `seq`.
pub async fn record<C: ConnectionTrait>(
    conn: &C,
    entry: NewActivity,
    at: DateTimeWithTimeZone,
) -> ApiResult<()> {
    let last: Option<Option<i32>> = activity::Entity::find()
        .select_only()
        .column_as(activity::Column::Seq.max(), "seq")
        .filter(activity::Column::LeadId.eq(entry.lead_id))
        .into_tuple()
        .one(conn)
        .await?;
    let model = activity::ActiveModel {
        id: Set(Uuid::new_v4()),
        lead_id: Set(entry.lead_id),
        seq: Set(last.flatten().unwrap_or(0) + 1),
        kind: Set(entry.kind),
        description: Set(entry.description),
        actor_id: Set(entry.actor_id),
        metadata: Set(entry.metadata),
        created_at: Set(at),
    };
    activity::Entity::insert(model)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct ActivityLog {
    db: Arc<DatabaseConnection>,
}

impl ActivityLog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Timeline for one lead, newest first.
    pub async fn for_lead(&self, lead_id: Uuid) -> ApiResult<Vec<activity::Model>> {
        Ok(activity::Entity::find()
            .filter(activity::Column::LeadId.eq(lead_id))
            .order_by_desc(activity::Column::Seq)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn count_for_lead(&self, lead_id: Uuid) -> ApiResult<u64> {
        let count = activity::Entity::find()
            .filter(activity::Column::LeadId.eq(lead_id))
            .count(self.db.as_ref())
            .await?;
        Ok(count)
    }

    /// Retention cleanup: drops every entry older than `cutoff`.
    #[instrument(name = "crm.activity.purge", skip(self))]
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> ApiResult<u64> {
        let cutoff: DateTimeWithTimeZone = cutoff.into();
        let result = activity::Entity::delete_many()
            .filter(activity::Column::CreatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;
        tracing::info!(removed = result.rows_affected, "activity retention cleanup");
        Ok(result.rows_affected)
    }
}

//! Pipelines and their ordered stages.

use std::sync::Arc;

use chrono::Utc;
use entity::{lead, pipeline, stage};
use platform_api::{ApiError, ApiResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct NewStage {
    pub key: String,
    pub name: String,
    pub deadline_hours: i32,
    pub wip_limit: Option<i32>,
    pub enter_roles: Vec<String>,
    pub exit_roles: Vec<String>,
    pub is_won: bool,
    pub is_lost: bool,
}

impl NewStage {
    pub fn new(key: impl Into<String>, name: impl Into<String>, deadline_hours: i32) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            deadline_hours,
            ..Self::default()
        }
    }

    pub fn wip_limit(mut self, limit: i32) -> Self {
        self.wip_limit = Some(limit);
        self
    }

    pub fn enter_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enter_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn exit_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exit_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn won(mut self) -> Self {
        self.is_won = true;
        self
    }

    pub fn lost(mut self) -> Self {
        self.is_lost = true;
        self
    }

    fn validate(&self) -> ApiResult<()> {
        if self.name.trim().is_empty() {
            return Err(ApiError::invalid("name must not be empty"));
        }
        if self.deadline_hours < 0 {
            return Err(ApiError::invalid("deadlineHours must be >= 0"));
        }
        if matches!(self.wip_limit, Some(limit) if limit < 1) {
            return Err(ApiError::invalid("wipLimit must be >= 1 when set"));
        }
        if self.is_won && self.is_lost {
            return Err(ApiError::invalid("a stage cannot be both won and lost"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct StageGraph {
    db: Arc<DatabaseConnection>,
}

impl StageGraph {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(name = "crm.pipeline.create", skip(self))]
    pub async fn create_pipeline(&self, key: &str, name: &str) -> ApiResult<pipeline::Model> {
        let key = normalize_key(key)?;
        if name.trim().is_empty() {
            return Err(ApiError::invalid("name must not be empty"));
        }
        let taken = pipeline::Entity::find()
            .filter(pipeline::Column::Key.eq(key.as_str()))
            .one(self.db.as_ref())
            .await?;
        if taken.is_some() {
            return Err(ApiError::invalid(format!("pipeline key '{key}' already exists")));
        }
        let now: DateTimeWithTimeZone = Utc::now().into();
        let model = pipeline::ActiveModel {
            id: Set(Uuid::new_v4()),
            key: Set(key),
            name: Set(name.trim().to_string()),
            created_at: Set(now),
        };
        Ok(model.insert(self.db.as_ref()).await?)
    }

    pub async fn pipeline(&self, pipeline_id: Uuid) -> ApiResult<pipeline::Model> {
        pipeline::Entity::find_by_id(pipeline_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ApiError::not_found(format!("pipeline {pipeline_id}")))
    }

    /// Appends a stage at the end of the pipeline.
    #[instrument(name = "crm.stage.create", skip(self, input), fields(key = %input.key))]
    pub async fn create_stage(
        &self,
        pipeline_id: Uuid,
        input: NewStage,
    ) -> ApiResult<stage::Model> {
        input.validate()?;
        let key = normalize_key(&input.key)?;
        self.pipeline(pipeline_id).await?;
        let existing = self.list_stages(pipeline_id).await?;
        if existing.iter().any(|s| s.key == key) {
            return Err(ApiError::invalid(format!(
                "stage key '{key}' already exists in pipeline"
            )));
        }
        let next_order = existing.iter().map(|s| s.sort_order).max().unwrap_or(0) + 1;
        let now: DateTimeWithTimeZone = Utc::now().into();
        let model = stage::ActiveModel {
            id: Set(Uuid::new_v4()),
            pipeline_id: Set(pipeline_id),
            key: Set(key),
            name: Set(input.name.trim().to_string()),
            sort_order: Set(next_order),
            deadline_hours: Set(input.deadline_hours),
            wip_limit: Set(input.wip_limit),
            enter_roles: Set(roles_json(&input.enter_roles)),
            exit_roles: Set(roles_json(&input.exit_roles)),
            is_won: Set(input.is_won),
            is_lost: Set(input.is_lost),
            created_at: Set(now),
        };
        Ok(model.insert(self.db.as_ref()).await?)
    }

    pub async fn stage(&self, stage_id: Uuid) -> ApiResult<stage::Model> {
        stage::Entity::find_by_id(stage_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ApiError::not_found(format!("stage {stage_id}")))
    }

    pub async fn list_stages(&self, pipeline_id: Uuid) -> ApiResult<Vec<stage::Model>> {
        list_stages(self.db.as_ref(), pipeline_id).await
    }

    /// Where intake drops new leads.
    pub async fn first_stage(&self, pipeline_id: Uuid) -> ApiResult<Option<stage::Model>> {
        Ok(self.list_stages(pipeline_id).await?.into_iter().next())
    }

    /// Assigns orders `1..=n` following `ordered_ids`, which must name every
    /// stage of the pipeline exactly once.
    #[instrument(name = "crm.stage.reorder", skip(self, ordered_ids), fields(count = ordered_ids.len()))]
    pub async fn reorder_stages(
        &self,
        pipeline_id: Uuid,
        ordered_ids: &[Uuid],
    ) -> ApiResult<Vec<stage::Model>> {
        self.pipeline(pipeline_id).await?;
        let current = self.list_stages(pipeline_id).await?;
        let mut wanted = ordered_ids.to_vec();
        wanted.sort();
        wanted.dedup();
        if wanted.len() != ordered_ids.len() {
            return Err(ApiError::invalid("stageIds contains duplicates"));
        }
        let mut known: Vec<Uuid> = current.iter().map(|s| s.id).collect();
        known.sort();
        if wanted != known {
            return Err(ApiError::invalid(
                "stageIds must list every stage of the pipeline exactly once",
            ));
        }

        let txn = self.db.begin().await?;
        renumber(&txn, ordered_ids).await?;
        txn.commit().await?;
        self.list_stages(pipeline_id).await
    }

    pub async fn count_leads_in_stage(&self, stage_id: Uuid) -> ApiResult<u64> {
        count_leads_in_stage(self.db.as_ref(), stage_id).await
    }

    /// Refused with `Conflict` while any lead still sits in the stage.
    #[instrument(name = "crm.stage.delete", skip(self))]
    pub async fn delete_stage(&self, stage_id: Uuid) -> ApiResult<()> {
        let txn = self.db.begin().await?;
        let target = stage::Entity::find_by_id(stage_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("stage {stage_id}")))?;
        let leads = count_leads_in_stage(&txn, stage_id).await?;
        if leads > 0 {
            return Err(ApiError::conflict(format!(
                "stage '{}' still holds {leads} lead(s)",
                target.key
            )));
        }
        stage::Entity::delete_by_id(stage_id).exec(&txn).await?;
        let remaining: Vec<Uuid> = list_stages(&txn, target.pipeline_id)
            .await?
            .iter()
            .map(|s| s.id)
            .collect();
        renumber(&txn, &remaining).await?;
        txn.commit().await?;
        tracing::info!(stage = %stage_id, pipeline = %target.pipeline_id, "stage deleted");
        Ok(())
    }
}

pub(crate) async fn list_stages<C: ConnectionTrait>(
    conn: &C,
    pipeline_id: Uuid,
) -> ApiResult<Vec<stage::Model>> {
    Ok(stage::Entity::find()
        .filter(stage::Column::PipelineId.eq(pipeline_id))
        .order_by_asc(stage::Column::SortOrder)
        .all(conn)
        .await?)
}

pub(crate) async fn count_leads_in_stage<C: ConnectionTrait>(
    conn: &C,
    stage_id: Uuid,
) -> ApiResult<u64> {
    Ok(lead::Entity::find()
        .filter(lead::Column::StageId.eq(stage_id))
        .count(conn)
        .await?)
}

/// Two passes so the unique `(pipeline, order)` index holds after every
/// statement: park everything on negative slots, then settle on `1..=n`.
async fn renumber<C: ConnectionTrait>(conn: &C, ordered_ids: &[Uuid]) -> ApiResult<()> {
    for (idx, id) in ordered_ids.iter().enumerate() {
        set_order(conn, *id, -(idx as i32) - 1).await?;
    }
    for (idx, id) in ordered_ids.iter().enumerate() {
        set_order(conn, *id, idx as i32 + 1).await?;
    }
    Ok(())
}

async fn set_order<C: ConnectionTrait>(conn: &C, stage_id: Uuid, order: i32) -> ApiResult<()> {
    stage::Entity::update_many()
        .col_expr(stage::Column::SortOrder, Expr::value(order))
        .filter(stage::Column::Id.eq(stage_id))
        .exec(conn)
        .await?;
    Ok(())
}

fn normalize_key(raw: &str) -> ApiResult<String> {
    let key = raw.trim().to_ascii_lowercase();
    if key.is_empty() || key.len() > 64 {
        return Err(ApiError::invalid("key must be 1-64 characters"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ApiError::invalid(
            "key may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(key)
}

fn roles_json(roles: &[String]) -> Option<Value> {
    let cleaned: Vec<Value> = roles
        .iter()
        .map(|r| r.trim().to_ascii_lowercase())
        .filter(|r| !r.is_empty())
        .map(Value::String)
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(Value::Array(cleaned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_normalized() {
        assert_eq!(normalize_key(" Proposal_Sent ").unwrap(), "proposal_sent");
        assert!(normalize_key("").is_err());
        assert!(normalize_key("with space").is_err());
    }

    #[test]
    fn stage_input_is_validated() {
        assert!(NewStage::new("a", "A", -1).validate().is_err());
        assert!(NewStage::new("a", "A", 0).wip_limit(0).validate().is_err());
        assert!(NewStage::new("a", "A", 0).won().lost().validate().is_err());
        assert!(NewStage::new("a", " ", 0).validate().is_err());
        assert!(NewStage::new("a", "A", 24).wip_limit(5).validate().is_ok());
    }

    #[test]
    fn empty_role_lists_are_stored_as_null() {
        assert_eq!(roles_json(&[]), None);
        assert_eq!(
            roles_json(&[" Manager ".to_string()]),
            Some(Value::Array(vec![Value::String("manager".into())]))
        );
    }
}

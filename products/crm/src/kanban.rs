//! Moving cards between and within board columns.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use entity::activity::Kind;
use entity::{lead, pipeline, stage};
use platform_api::{ApiError, ApiResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, TransactionTrait,
};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::activity::{self, NewActivity};
use crate::context::{RequestContext, Role};
use crate::notify::{self, Notifier};
use crate::rank::Rank;
use crate::sla::SlaWindow;
use crate::stages;

/// A move request as it arrives from the transport layer. Ids stay raw so
/// malformed input is reported as `InvalidArgument`.
#[derive(Clone, Debug, Default)]
pub struct MoveCard {
    pub lead_id: String,
    pub to_stage_id: String,
    /// Card that should end up directly above the moved one.
    pub before_id: Option<String>,
    /// Card that should end up directly below the moved one.
    pub after_id: Option<String>,
    pub expected_version: Option<i32>,
}

impl MoveCard {
    pub fn new(lead_id: Uuid, to_stage_id: Uuid) -> Self {
        Self {
            lead_id: lead_id.to_string(),
            to_stage_id: to_stage_id.to_string(),
            ..Self::default()
        }
    }

    pub fn before(mut self, lead_id: Uuid) -> Self {
        self.before_id = Some(lead_id.to_string());
        self
    }

    pub fn after(mut self, lead_id: Uuid) -> Self {
        self.after_id = Some(lead_id.to_string());
        self
    }

    pub fn expect_version(mut self, version: i32) -> Self {
        self.expected_version = Some(version);
        self
    }
}

#[derive(Clone, Debug)]
pub struct BoardColumn {
    pub stage: stage::Model,
    pub leads: Vec<lead::Model>,
}

#[derive(Clone)]
pub struct KanbanMover {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn Notifier>,
}

impl KanbanMover {
    pub fn new(db: Arc<DatabaseConnection>, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    pub async fn move_card(&self, ctx: &RequestContext, req: MoveCard) -> ApiResult<lead::Model> {
        self.move_card_at(ctx, req, Utc::now()).await
    }

    #[instrument(
        name = "crm.kanban.move_card",
        skip(self, ctx, req, now),
        fields(lead = %req.lead_id, to = %req.to_stage_id, role = %ctx.role)
    )]
    pub async fn move_card_at(
        &self,
        ctx: &RequestContext,
        req: MoveCard,
        now: DateTime<Utc>,
    ) -> ApiResult<lead::Model> {
        let lead_id = parse_id("leadId", &req.lead_id)?;
        let to_stage_id = parse_id("toStageId", &req.to_stage_id)?;
        let before_id = parse_optional_id("beforeId", req.before_id.as_deref())?;
        let after_id = parse_optional_id("afterId", req.after_id.as_deref())?;

        let db = self.db.as_ref();
        let current = lead::Entity::find_by_id(lead_id)
            .one(db)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("lead {lead_id}")))?;
        if !ctx.may_touch(&current.owners()) {
            return Err(ApiError::forbidden("you can only move leads you own"));
        }
        let destination = stage::Entity::find_by_id(to_stage_id)
            .one(db)
            .await?
            .ok_or_else(|| ApiError::invalid(format!("toStageId {to_stage_id} does not exist")))?;

        let stage_changed = destination.id != current.stage_id;
        let origin = stage::Entity::find_by_id(current.stage_id).one(db).await?;
        if stage_changed {
            check_gates(ctx, origin.as_ref(), &destination)?;
            if let Some(limit) = destination.wip_limit {
                let occupied = stages::count_leads_in_stage(db, destination.id).await?;
                if occupied >= limit.max(0) as u64 {
                    return Err(ApiError::conflict(format!(
                        "stage '{}' is at its WIP limit of {limit}",
                        destination.name
                    )));
                }
            }
        }
        if let Some(expected) = req.expected_version {
            if expected != current.version {
                return Err(ApiError::conflict(format!(
                    "lead {lead_id} is at version {}, not {expected}",
                    current.version
                )));
            }
        }

        let before_rank = neighbour_rank(db, before_id, lead_id, destination.id).await?;
        let after_rank = neighbour_rank(db, after_id, lead_id, destination.id).await?;
        let new_rank = if before_rank.is_none() && after_rank.is_none() {
            last_rank_in_stage(db, destination.id, Some(lead_id))
                .await?
                .map_or_else(Rank::initial, |last| last.after())
        } else {
            Rank::between(before_rank.as_ref(), after_rank.as_ref())
        };

        let stamp: DateTimeWithTimeZone = now.into();
        let mut patch = lead::ActiveModel {
            pipeline_id: Set(destination.pipeline_id),
            stage_id: Set(destination.id),
            rank: Set(new_rank.into_string()),
            version: Set(current.version + 1),
            updated_at: Set(stamp),
            ..Default::default()
        };
        if stage_changed {
            let window = SlaWindow::open(&destination, stamp);
            patch.entered_stage_at = Set(Some(window.entered_at));
            patch.due_date = Set(window.due_date);
            patch.is_overdue = Set(false);
            patch.overdue_hours = Set(0);
            if destination.is_won {
                patch.status = Set(lead::Status::Won);
            } else if destination.is_lost {
                patch.status = Set(lead::Status::Lost);
            }
        }

        let txn = self.db.begin().await?;
        let result = lead::Entity::update_many()
            .set(patch)
            .filter(lead::Column::Id.eq(lead_id))
            .filter(lead::Column::Version.eq(current.version))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ApiError::conflict(format!(
                "lead {lead_id} was changed concurrently"
            )));
        }
        if stage_changed {
            let from_name = origin
                .as_ref()
                .map(|s| s.name.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let entry = NewActivity::new(
                lead_id,
                Kind::StageChanged,
                format!("Moved from {from_name} to {}", destination.name),
            )
            .by(ctx.user_id)
            .with_metadata(json!({
                "from": from_name,
                "to": destination.name,
                "fromStageId": current.stage_id,
                "toStageId": destination.id,
            }));
            activity::record(&txn, entry, stamp).await?;
        }
        txn.commit().await?;

        let moved = lead::Entity::find_by_id(lead_id)
            .one(db)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("lead {lead_id}")))?;

        if stage_changed {
            let payload = json!({
                "leadId": moved.id,
                "stageId": moved.stage_id,
                "pipelineId": moved.pipeline_id,
                "fromPipelineId": current.pipeline_id,
                "rank": moved.rank,
                "movedBy": ctx.user_id,
            });
            // Boards of the origin pipeline must drop the card too.
            if current.pipeline_id != moved.pipeline_id {
                self.notifier.publish(
                    &notify::pipeline_channel(current.pipeline_id),
                    notify::CARD_MOVED,
                    payload.clone(),
                );
            }
            self.notifier.publish(
                &notify::pipeline_channel(moved.pipeline_id),
                notify::CARD_MOVED,
                payload,
            );
            tracing::info!(from = %current.stage_id, version = moved.version, "card moved");
        } else {
            tracing::debug!(rank = %moved.rank, "card reordered");
        }
        Ok(moved)
    }

    /// Columns in stage order, cards sorted by `(rank, created_at, id)`.
    #[instrument(name = "crm.kanban.board", skip(self))]
    pub async fn board(&self, pipeline_id: Uuid) -> ApiResult<Vec<BoardColumn>> {
        let db = self.db.as_ref();
        pipeline::Entity::find_by_id(pipeline_id)
            .one(db)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("pipeline {pipeline_id}")))?;
        let stage_list = stages::list_stages(db, pipeline_id).await?;
        let leads = lead::Entity::find()
            .filter(lead::Column::PipelineId.eq(pipeline_id))
            .all(db)
            .await?;

        let mut by_stage: HashMap<Uuid, Vec<lead::Model>> = HashMap::new();
        for lead in leads {
            by_stage.entry(lead.stage_id).or_default().push(lead);
        }
        Ok(stage_list
            .into_iter()
            .map(|stage| {
                let mut leads = by_stage.remove(&stage.id).unwrap_or_default();
                sort_cards(&mut leads);
                BoardColumn { stage, leads }
            })
            .collect())
    }
}

/// Board order. Ranks compare bytewise so the result never depends on the
/// database collation.
pub fn sort_cards(leads: &mut [lead::Model]) {
    leads.sort_by(|a, b| {
        a.rank
            .as_bytes()
            .cmp(b.rank.as_bytes())
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Highest well-formed rank currently used in the stage.
pub(crate) async fn last_rank_in_stage<C: ConnectionTrait>(
    conn: &C,
    stage_id: Uuid,
    excluding: Option<Uuid>,
) -> ApiResult<Option<Rank>> {
    let rows: Vec<(Uuid, String)> = lead::Entity::find()
        .select_only()
        .column(lead::Column::Id)
        .column(lead::Column::Rank)
        .filter(lead::Column::StageId.eq(stage_id))
        .into_tuple()
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .filter(|(id, _)| Some(*id) != excluding)
        .filter_map(|(_, rank)| Rank::parse(&rank))
        .max())
}

/// Rank of a placement neighbour, or `None` when it is missing, is the card
/// being moved, or sits in another stage.
async fn neighbour_rank<C: ConnectionTrait>(
    conn: &C,
    neighbour: Option<Uuid>,
    moving: Uuid,
    stage_id: Uuid,
) -> ApiResult<Option<Rank>> {
    let Some(id) = neighbour.filter(|id| *id != moving) else {
        return Ok(None);
    };
    let found = lead::Entity::find_by_id(id).one(conn).await?;
    Ok(found
        .filter(|n| n.stage_id == stage_id)
        .and_then(|n| Rank::parse(&n.rank)))
}

fn check_gates(
    ctx: &RequestContext,
    origin: Option<&stage::Model>,
    destination: &stage::Model,
) -> ApiResult<()> {
    if ctx.role == Role::Admin {
        return Ok(());
    }
    let role = ctx.role.as_str();
    if let Some(exit) = origin.and_then(|s| s.exit_role_list()) {
        if !exit.iter().any(|r| r == role) {
            return Err(ApiError::forbidden(format!(
                "role '{role}' may not move cards out of this stage"
            )));
        }
    }
    if let Some(enter) = destination.enter_role_list() {
        if !enter.iter().any(|r| r == role) {
            return Err(ApiError::forbidden(format!(
                "role '{role}' may not move cards into '{}'",
                destination.name
            )));
        }
    }
    Ok(())
}

fn parse_id(field: &str, raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::invalid(format!("{field} is not a valid identifier")))
}

fn parse_optional_id(field: &str, raw: Option<&str>) -> ApiResult<Option<Uuid>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_id(field, value).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gated_stage(enter: Option<&[&str]>, exit: Option<&[&str]>) -> stage::Model {
        let roles = |list: Option<&[&str]>| list.map(|l| json!(l));
        stage::Model {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            key: "gated".into(),
            name: "Gated".into(),
            sort_order: 1,
            deadline_hours: 0,
            wip_limit: None,
            enter_roles: roles(enter),
            exit_roles: roles(exit),
            is_won: false,
            is_lost: false,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn malformed_ids_are_invalid_arguments() {
        let err = parse_id("leadId", "not-a-uuid").unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert_eq!(parse_optional_id("beforeId", Some(" ")).unwrap(), None);
    }

    #[test]
    fn gates_check_exit_then_enter_roles() {
        let seller = RequestContext::new(Uuid::new_v4(), Role::Seller);
        let open = gated_stage(None, None);
        let managers_in = gated_stage(Some(&["manager"]), None);
        let managers_out = gated_stage(None, Some(&["manager"]));

        assert!(check_gates(&seller, Some(&open), &open).is_ok());
        assert_eq!(
            check_gates(&seller, Some(&open), &managers_in)
                .unwrap_err()
                .code(),
            "FORBIDDEN"
        );
        assert!(check_gates(&seller, Some(&managers_out), &open).is_err());

        let manager = RequestContext::new(Uuid::new_v4(), Role::Manager);
        assert!(check_gates(&manager, Some(&managers_out), &managers_in).is_ok());
        assert!(check_gates(&RequestContext::system(), Some(&managers_out), &managers_in).is_ok());
    }
}

//! Inbound leads from forms, webhooks and manual entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use entity::activity::Kind;
use entity::lead::{self, Priority, Status};
use platform_api::{ApiError, ApiResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::activity::{self, NewActivity};
use crate::context::RequestContext;
use crate::distribution::{self, Distributor, OwnerResolution};
use crate::kanban::last_rank_in_stage;
use crate::notify::{self, Notifier};
use crate::rank::Rank;
use crate::sla::SlaWindow;
use crate::stages;

#[derive(Clone, Debug, Default)]
pub struct NewLead {
    pub pipeline_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub lives_count: i32,
    pub has_legal_entity: bool,
    pub priority: Option<Priority>,
    pub score: Option<i32>,
}

impl NewLead {
    pub fn new(pipeline_id: Uuid, name: impl Into<String>, lives_count: i32) -> Self {
        Self {
            pipeline_id,
            name: name.into(),
            lives_count,
            ..Self::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn legal_entity(mut self, has_legal_entity: bool) -> Self {
        self.has_legal_entity = has_legal_entity;
        self
    }

    fn normalized(mut self) -> ApiResult<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(ApiError::invalid("name must not be empty"));
        }
        if self.lives_count < 0 {
            return Err(ApiError::invalid("livesCount must be >= 0"));
        }
        if matches!(self.score, Some(score) if !(0..=100).contains(&score)) {
            return Err(ApiError::invalid("score must be between 0 and 100"));
        }
        self.email = clean(self.email).map(|e| e.to_ascii_lowercase());
        self.phone = clean(self.phone);
        self.company = clean(self.company);
        self.source = clean(self.source);
        Ok(self)
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Clone, Debug)]
pub enum IntakeOutcome {
    Created {
        lead: lead::Model,
        resolution: OwnerResolution,
    },
    /// An open lead with the same contact already existed.
    Reconverted {
        lead: lead::Model,
        resolution: OwnerResolution,
    },
}

impl IntakeOutcome {
    pub fn lead(&self) -> &lead::Model {
        match self {
            IntakeOutcome::Created { lead, .. } | IntakeOutcome::Reconverted { lead, .. } => lead,
        }
    }

    pub fn resolution(&self) -> OwnerResolution {
        match self {
            IntakeOutcome::Created { resolution, .. }
            | IntakeOutcome::Reconverted { resolution, .. } => *resolution,
        }
    }

    pub fn is_reconversion(&self) -> bool {
        matches!(self, IntakeOutcome::Reconverted { .. })
    }
}

#[derive(Clone)]
pub struct LeadIntake {
    db: Arc<DatabaseConnection>,
    distributor: Distributor,
    notifier: Arc<dyn Notifier>,
}

impl LeadIntake {
    pub fn new(
        db: Arc<DatabaseConnection>,
        distributor: Distributor,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            distributor,
            notifier,
        }
    }

    pub async fn ingest_lead(
        &self,
        ctx: &RequestContext,
        input: NewLead,
    ) -> ApiResult<IntakeOutcome> {
        self.ingest_lead_at(ctx, input, Utc::now()).await
    }

    #[instrument(
        name = "crm.intake.ingest",
        skip(self, ctx, input, now),
        fields(pipeline = %input.pipeline_id)
    )]
    pub async fn ingest_lead_at(
        &self,
        ctx: &RequestContext,
        input: NewLead,
        now: DateTime<Utc>,
    ) -> ApiResult<IntakeOutcome> {
        let input = input.normalized()?;
        let db = self.db.as_ref();
        entity::pipeline::Entity::find_by_id(input.pipeline_id)
            .one(db)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("pipeline {}", input.pipeline_id)))?;

        if let Some(existing) = self.find_open_duplicate(&input).await? {
            tracing::info!(lead = %existing.id, "inbound contact matches open lead");
            return self
                .reconvert_existing(
                    ctx,
                    existing,
                    input.lives_count,
                    input.has_legal_entity,
                    input.source.as_deref(),
                    now,
                )
                .await;
        }

        let first = stages::list_stages(db, input.pipeline_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found("pipeline has no stages"))?;
        let resolution = self
            .distributor
            .resolve_responsible_owner(input.lives_count, input.has_legal_entity, None)
            .await?;
        let last = last_rank_in_stage(db, first.id, None).await?;
        let stamp: DateTimeWithTimeZone = now.into();
        let window = SlaWindow::open(&first, stamp);
        let owners: Vec<Uuid> = resolution.owner_id().into_iter().collect();
        let lead_id = Uuid::new_v4();

        let model = lead::ActiveModel {
            id: Set(lead_id),
            pipeline_id: Set(input.pipeline_id),
            stage_id: Set(first.id),
            name: Set(input.name.clone()),
            email: Set(input.email.clone()),
            phone: Set(input.phone.clone()),
            company: Set(input.company.clone()),
            source: Set(input.source.clone()),
            status: Set(Status::New),
            priority: Set(input.priority.unwrap_or(Priority::Medium)),
            score: Set(input.score.unwrap_or(0)),
            owner_ids: Set(lead::owners_to_json(&owners)),
            rank: Set(last.map_or_else(Rank::initial, |last| last.after()).into_string()),
            version: Set(1),
            lives_count: Set(input.lives_count),
            has_legal_entity: Set(input.has_legal_entity),
            entered_stage_at: Set(Some(window.entered_at)),
            due_date: Set(window.due_date),
            is_overdue: Set(false),
            overdue_hours: Set(0),
            created_at: Set(stamp),
            updated_at: Set(stamp),
        };

        let txn = self.db.begin().await?;
        lead::Entity::insert(model)
            .exec_without_returning(&txn)
            .await?;
        if let OwnerResolution::Assigned(owner) = resolution {
            distribution::mark_assigned(&txn, owner).await?;
        }
        let created = NewActivity::new(
            lead_id,
            Kind::Created,
            format!("Lead created in {}", first.name),
        )
        .by(ctx.user_id)
        .with_metadata(json!({
            "stageId": first.id,
            "source": input.source,
            "livesCount": input.lives_count,
            "hasLegalEntity": input.has_legal_entity,
        }));
        activity::record(&txn, created, stamp).await?;
        if let Some(owner) = resolution.owner_id() {
            let assigned = NewActivity::new(lead_id, Kind::OwnerAssigned, "Owner assigned")
                .by(ctx.user_id)
                .with_metadata(json!({ "ownerId": owner }));
            activity::record(&txn, assigned, stamp).await?;
        }
        txn.commit().await?;

        let lead = find_lead(db, lead_id).await?;
        self.notifier.publish(
            &notify::pipeline_channel(lead.pipeline_id),
            notify::LEAD_CREATED,
            json!({
                "leadId": lead.id,
                "stageId": lead.stage_id,
                "rank": lead.rank,
                "ownerId": resolution.owner_id(),
            }),
        );
        tracing::info!(lead = %lead.id, owner = ?resolution.owner_id(), "lead created");
        Ok(IntakeOutcome::Created { lead, resolution })
    }

    /// Applies a new contact event to an existing lead.
    pub async fn reconvert(
        &self,
        ctx: &RequestContext,
        lead_id: Uuid,
        lives_count: i32,
        has_legal_entity: bool,
    ) -> ApiResult<IntakeOutcome> {
        if lives_count < 0 {
            return Err(ApiError::invalid("livesCount must be >= 0"));
        }
        let existing = find_lead(self.db.as_ref(), lead_id).await?;
        self.reconvert_existing(ctx, existing, lives_count, has_legal_entity, None, Utc::now())
            .await
    }

    async fn find_open_duplicate(&self, input: &NewLead) -> ApiResult<Option<lead::Model>> {
        let candidates = |column: lead::Column, value: &str| {
            lead::Entity::find()
                .filter(lead::Column::PipelineId.eq(input.pipeline_id))
                .filter(column.eq(value))
        };
        let mut matches = Vec::new();
        if let Some(email) = &input.email {
            matches = candidates(lead::Column::Email, email)
                .all(self.db.as_ref())
                .await?;
            matches.retain(|l| !l.is_closed());
        }
        if matches.is_empty() {
            if let Some(phone) = &input.phone {
                matches = candidates(lead::Column::Phone, phone)
                    .all(self.db.as_ref())
                    .await?;
                matches.retain(|l| !l.is_closed());
            }
        }
        Ok(matches
            .into_iter()
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))))
    }

    #[instrument(name = "crm.intake.reconvert", skip_all, fields(lead = %existing.id))]
    async fn reconvert_existing(
        &self,
        ctx: &RequestContext,
        existing: lead::Model,
        lives_count: i32,
        has_legal_entity: bool,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> ApiResult<IntakeOutcome> {
        let previous = existing.primary_owner();
        let resolution = self
            .distributor
            .resolve_responsible_owner(lives_count, has_legal_entity, previous)
            .await?;
        let owners = match resolution {
            OwnerResolution::Retained(_) => existing.owners(),
            OwnerResolution::Assigned(id) => vec![id],
            OwnerResolution::Unassigned => {
                if previous.is_some() {
                    tracing::warn!(
                        lead = %existing.id,
                        "owner no longer eligible and no replacement found; keeping owners"
                    );
                }
                existing.owners()
            }
        };

        let stamp: DateTimeWithTimeZone = now.into();
        let patch = lead::ActiveModel {
            lives_count: Set(lives_count),
            has_legal_entity: Set(has_legal_entity),
            owner_ids: Set(lead::owners_to_json(&owners)),
            version: Set(existing.version + 1),
            updated_at: Set(stamp),
            ..Default::default()
        };

        let txn = self.db.begin().await?;
        let result = lead::Entity::update_many()
            .set(patch)
            .filter(lead::Column::Id.eq(existing.id))
            .filter(lead::Column::Version.eq(existing.version))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ApiError::conflict(format!(
                "lead {} was changed concurrently",
                existing.id
            )));
        }
        if let OwnerResolution::Assigned(owner) = resolution {
            distribution::mark_assigned(&txn, owner).await?;
        }
        let reconverted = NewActivity::new(existing.id, Kind::Reconverted, "Lead re-converted")
            .by(ctx.user_id)
            .with_metadata(json!({
                "source": source,
                "livesCount": lives_count,
                "hasLegalEntity": has_legal_entity,
            }));
        activity::record(&txn, reconverted, stamp).await?;
        let reassigned_to = match resolution {
            OwnerResolution::Assigned(id) if previous != Some(id) => Some(id),
            _ => None,
        };
        if let Some(new_owner) = reassigned_to {
            let (kind, description) = match previous {
                Some(_) => (Kind::OwnerReassigned, "Owner reassigned"),
                None => (Kind::OwnerAssigned, "Owner assigned"),
            };
            let entry = NewActivity::new(existing.id, kind, description)
                .by(ctx.user_id)
                .with_metadata(json!({ "from": previous, "to": new_owner }));
            activity::record(&txn, entry, stamp).await?;
        }
        txn.commit().await?;

        let lead = find_lead(self.db.as_ref(), existing.id).await?;
        if let Some(new_owner) = reassigned_to {
            self.notifier.publish(
                &notify::pipeline_channel(lead.pipeline_id),
                notify::LEAD_REASSIGNED,
                json!({
                    "leadId": lead.id,
                    "from": previous,
                    "to": new_owner,
                }),
            );
        }
        Ok(IntakeOutcome::Reconverted { lead, resolution })
    }
}

async fn find_lead(db: &DatabaseConnection, lead_id: Uuid) -> ApiResult<lead::Model> {
    lead::Entity::find_by_id(lead_id)
        .one(db)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("lead {lead_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_is_trimmed_and_email_lowercased() {
        let input = NewLead::new(Uuid::new_v4(), "  Acme  ", 3)
            .email(" Buyer@Example.COM ")
            .phone("  ");
        let input = input.normalized().unwrap();
        assert_eq!(input.name, "Acme");
        assert_eq!(input.email.as_deref(), Some("buyer@example.com"));
        assert_eq!(input.phone, None);
    }

    #[test]
    fn invalid_input_is_rejected() {
        let pipeline = Uuid::new_v4();
        assert!(NewLead::new(pipeline, " ", 1).normalized().is_err());
        assert!(NewLead::new(pipeline, "A", -1).normalized().is_err());
        let mut scored = NewLead::new(pipeline, "A", 1);
        scored.score = Some(101);
        assert!(scored.normalized().is_err());
    }
}

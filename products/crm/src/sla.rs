//! Stage deadlines and overdue tracking.
//!
//! The overdue fields on a lead are derived values: they can always be
//! recomputed from `due_date` and the current instant. Writes to them never
//! bump the lead version.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use entity::{lead, stage};
use platform_api::{ApiError, ApiResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

/// Deadline window opened when a lead enters a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlaWindow {
    pub entered_at: DateTimeWithTimeZone,
    pub due_date: Option<DateTimeWithTimeZone>,
}

impl SlaWindow {
    /// A stage with zero deadline hours yields no due date.
    pub fn open(stage: &stage::Model, entered_at: DateTimeWithTimeZone) -> Self {
        let due_date = stage
            .has_sla()
            .then(|| entered_at + Duration::hours(i64::from(stage.deadline_hours)));
        Self {
            entered_at,
            due_date,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaStatus {
    pub is_overdue: bool,
    pub overdue_hours: i64,
    pub days_until_due: Option<i64>,
    pub hours_until_due: Option<i64>,
}

/// Compares `due` against `now`. Exactly at the due instant is still on time.
pub fn evaluate(due: Option<DateTimeWithTimeZone>, now: DateTime<Utc>) -> SlaStatus {
    let Some(due) = due else {
        return SlaStatus::default();
    };
    let diff = now - due.with_timezone(&Utc);
    if diff > Duration::zero() {
        SlaStatus {
            is_overdue: true,
            overdue_hours: diff.num_hours(),
            days_until_due: None,
            hours_until_due: None,
        }
    } else {
        let remaining = -diff;
        SlaStatus {
            is_overdue: false,
            overdue_hours: 0,
            days_until_due: Some(remaining.num_days()),
            hours_until_due: Some(remaining.num_hours()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub total: u64,
    pub overdue: u64,
    pub updated: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaStats {
    pub total: u64,
    pub on_time: u64,
    pub overdue: u64,
    #[serde(rename = "noSLA")]
    pub no_sla: u64,
    pub avg_overdue_hours: f64,
}

impl SlaStats {
    fn from_leads(leads: &[lead::Model], now: DateTime<Utc>) -> Self {
        let mut stats = SlaStats {
            total: leads.len() as u64,
            ..Self::default()
        };
        let mut overdue_hours_sum = 0i64;
        for lead in leads {
            if lead.due_date.is_none() {
                stats.no_sla += 1;
                continue;
            }
            let status = evaluate(lead.due_date, now);
            if status.is_overdue {
                stats.overdue += 1;
                overdue_hours_sum += status.overdue_hours;
            } else {
                stats.on_time += 1;
            }
        }
        if stats.overdue > 0 {
            let mean = overdue_hours_sum as f64 / stats.overdue as f64;
            stats.avg_overdue_hours = (mean * 100.0).round() / 100.0;
        }
        stats
    }
}

#[derive(Clone)]
pub struct SlaClock {
    db: Arc<DatabaseConnection>,
}

impl SlaClock {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Restarts the lead's clock for `stage_id`. Returns `None` and leaves the
    /// lead untouched when the stage carries no SLA.
    #[instrument(name = "crm.sla.calculate_due_date", skip(self))]
    pub async fn calculate_due_date(
        &self,
        lead_id: Uuid,
        stage_id: Uuid,
        entered_at: Option<DateTime<Utc>>,
    ) -> ApiResult<Option<DateTimeWithTimeZone>> {
        let stage = stage::Entity::find_by_id(stage_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ApiError::not_found(format!("stage {stage_id}")))?;
        let lead = find_lead(self.db.as_ref(), lead_id).await?;
        if lead.pipeline_id != stage.pipeline_id {
            return Err(ApiError::invalid(
                "stageId must belong to the lead's pipeline",
            ));
        }
        if !stage.has_sla() {
            return Ok(None);
        }

        let entered_at: DateTimeWithTimeZone = entered_at.unwrap_or_else(Utc::now).into();
        let window = SlaWindow::open(&stage, entered_at);
        lead::Entity::update_many()
            .set(lead::ActiveModel {
                entered_stage_at: Set(Some(window.entered_at)),
                due_date: Set(window.due_date),
                is_overdue: Set(false),
                overdue_hours: Set(0),
                ..Default::default()
            })
            .filter(lead::Column::Id.eq(lead_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(window.due_date)
    }

    pub async fn check_overdue(&self, lead_id: Uuid) -> ApiResult<SlaStatus> {
        self.check_overdue_at(lead_id, Utc::now()).await
    }

    /// Evaluates the lead at `now` and persists the overdue fields only when
    /// they disagree with the stored ones. Storage failures degrade to the
    /// not-overdue default.
    #[instrument(name = "crm.sla.check_overdue", skip(self, now))]
    pub async fn check_overdue_at(
        &self,
        lead_id: Uuid,
        now: DateTime<Utc>,
    ) -> ApiResult<SlaStatus> {
        let lead = match lead::Entity::find_by_id(lead_id)
            .one(self.db.as_ref())
            .await
        {
            Ok(Some(lead)) => lead,
            Ok(None) => return Err(ApiError::not_found(format!("lead {lead_id}"))),
            Err(err) => {
                tracing::warn!(error = %err, lead = %lead_id, "sla check degraded");
                return Ok(SlaStatus::default());
            }
        };
        let status = evaluate(lead.due_date, now);
        if let Err(err) = self.write_back(&lead, &status).await {
            tracing::warn!(error = %err, lead = %lead_id, "sla write-back failed");
        }
        Ok(status)
    }

    pub async fn update_all_overdue_leads(&self) -> ApiResult<SweepSummary> {
        self.update_all_overdue_leads_at(Utc::now()).await
    }

    /// Recomputes every lead that has a due date. Safe to run alongside moves:
    /// only the derived fields are written.
    #[instrument(name = "crm.sla.sweep", skip(self, now))]
    pub async fn update_all_overdue_leads_at(
        &self,
        now: DateTime<Utc>,
    ) -> ApiResult<SweepSummary> {
        let leads = lead::Entity::find()
            .filter(lead::Column::DueDate.is_not_null())
            .all(self.db.as_ref())
            .await?;
        let mut summary = SweepSummary {
            total: leads.len() as u64,
            ..SweepSummary::default()
        };
        for lead in &leads {
            let status = evaluate(lead.due_date, now);
            if status.is_overdue {
                summary.overdue += 1;
            }
            match self.write_back(lead, &status).await {
                Ok(true) => summary.updated += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(error = %err, lead = %lead.id, "sla sweep skipped lead")
                }
            }
        }
        tracing::info!(
            total = summary.total,
            overdue = summary.overdue,
            updated = summary.updated,
            "sla sweep finished"
        );
        Ok(summary)
    }

    pub async fn sla_stats_by_pipeline(&self, pipeline_id: Uuid) -> SlaStats {
        self.sla_stats_by_pipeline_at(pipeline_id, Utc::now()).await
    }

    /// Read-only aggregation. Storage failures yield zeroed stats.
    #[instrument(name = "crm.sla.stats", skip(self, now))]
    pub async fn sla_stats_by_pipeline_at(
        &self,
        pipeline_id: Uuid,
        now: DateTime<Utc>,
    ) -> SlaStats {
        match lead::Entity::find()
            .filter(lead::Column::PipelineId.eq(pipeline_id))
            .all(self.db.as_ref())
            .await
        {
            Ok(leads) => SlaStats::from_leads(&leads, now),
            Err(err) => {
                tracing::warn!(error = %err, pipeline = %pipeline_id, "sla stats degraded");
                SlaStats::default()
            }
        }
    }

    async fn write_back(&self, lead: &lead::Model, status: &SlaStatus) -> Result<bool, DbErr> {
        let hours = i32::try_from(status.overdue_hours).unwrap_or(i32::MAX);
        if lead.is_overdue == status.is_overdue && lead.overdue_hours == hours {
            return Ok(false);
        }
        lead::Entity::update_many()
            .set(lead::ActiveModel {
                is_overdue: Set(status.is_overdue),
                overdue_hours: Set(hours),
                ..Default::default()
            })
            .filter(lead::Column::Id.eq(lead.id))
            .exec(self.db.as_ref())
            .await?;
        Ok(true)
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
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    fn stage_with(hours: i32) -> stage::Model {
        stage::Model {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            key: "s".into(),
            name: "S".into(),
            sort_order: 1,
            deadline_hours: hours,
            wip_limit: None,
            enter_roles: None,
            exit_roles: None,
            is_won: false,
            is_lost: false,
            created_at: at(0).into(),
        }
    }

    #[test]
    fn window_adds_deadline_hours() {
        let window = SlaWindow::open(&stage_with(48), at(0).into());
        assert_eq!(window.due_date, Some((at(0) + Duration::hours(48)).into()));
    }

    #[test]
    fn zero_hour_stage_has_no_due_date() {
        let window = SlaWindow::open(&stage_with(0), at(3).into());
        assert_eq!(window.due_date, None);
        assert_eq!(window.entered_at, DateTimeWithTimeZone::from(at(3)));
    }

    #[test]
    fn exactly_due_is_not_overdue() {
        let status = evaluate(Some(at(10).into()), at(10));
        assert!(!status.is_overdue);
        assert_eq!(status.overdue_hours, 0);
        assert_eq!(status.hours_until_due, Some(0));
    }

    #[test]
    fn overdue_hours_are_truncated() {
        let now = at(12) + Duration::minutes(59);
        let status = evaluate(Some(at(10).into()), now);
        assert!(status.is_overdue);
        assert_eq!(status.overdue_hours, 2);
        assert_eq!(status.days_until_due, None);
    }

    #[test]
    fn one_second_late_is_overdue_with_zero_hours() {
        let status = evaluate(Some(at(10).into()), at(10) + Duration::seconds(1));
        assert!(status.is_overdue);
        assert_eq!(status.overdue_hours, 0);
    }

    #[test]
    fn remaining_time_reports_days_and_hours() {
        let status = evaluate(Some((at(0) + Duration::hours(50)).into()), at(0));
        assert_eq!(status.days_until_due, Some(2));
        assert_eq!(status.hours_until_due, Some(50));
    }

    #[test]
    fn no_due_date_is_on_time_without_countdown() {
        assert_eq!(evaluate(None, at(0)), SlaStatus::default());
    }
}

//! GraphQL surface over the lead workflow.

use std::sync::Arc;

use anyhow::anyhow;
use async_graphql::futures_util::{Stream, stream};
use async_graphql::{
    Context, ErrorExtensions, InputObject, Json, Object, Schema, SimpleObject, Subscription, ID,
};
use chrono::{DateTime, Utc};
use crm::kanban::BoardColumn;
use crm::notify::{BroadcastNotifier, RealtimeEvent, pipeline_channel};
use crm::sla::{SlaStats, SlaStatus, SweepSummary};
use crm::{Crm, IntakeOutcome, MoveCard, NewLead, NewStage, RequestContext, Role};
use entity::{activity, lead, pipeline, stage};
use platform_api::{ApiError, ApiResult, internal_error};
use platform_authz::{Operation, PermissionTable};
use sea_orm::ActiveEnum;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::instrument;
use uuid::Uuid;

pub type SchemaType = Schema<QueryRoot, MutationRoot, SubscriptionRoot>;

pub fn build_schema(
    crm: Crm,
    permissions: Arc<PermissionTable>,
    realtime: Arc<BroadcastNotifier>,
) -> SchemaType {
    Schema::build(QueryRoot, MutationRoot, SubscriptionRoot)
        .data(crm)
        .data(permissions)
        .data(realtime)
        .finish()
}

/// Caller used when the gateway did not identify anyone.
pub fn anonymous() -> RequestContext {
    RequestContext {
        user_id: None,
        role: Role::Viewer,
    }
}

#[derive(Default)]
pub struct QueryRoot;

#[derive(Default)]
pub struct MutationRoot;

#[derive(Default)]
pub struct SubscriptionRoot;

#[Object]
impl QueryRoot {
    async fn crm(&self) -> CrmQuery {
        CrmQuery
    }

    #[instrument(name = "graphql.version", skip_all)]
    async fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

#[Object]
impl MutationRoot {
    async fn crm(&self) -> CrmMutation {
        CrmMutation
    }
}

pub struct CrmQuery;

pub struct CrmMutation;

#[Object]
impl CrmQuery {
    #[instrument(name = "graphql.crm.stages", skip_all)]
    async fn stages(
        &self,
        ctx: &Context<'_>,
        pipeline_id: ID,
    ) -> async_graphql::Result<Vec<StageNode>> {
        authorize(ctx, Operation::ReadBoard)?;
        let pipeline_id = parse_id("pipelineId", &pipeline_id)?;
        let stages = gql(services(ctx)?.stages.list_stages(pipeline_id).await)?;
        Ok(stages.into_iter().map(StageNode::from).collect())
    }

    #[instrument(name = "graphql.crm.board", skip_all)]
    async fn board(
        &self,
        ctx: &Context<'_>,
        pipeline_id: ID,
    ) -> async_graphql::Result<Vec<BoardColumnNode>> {
        authorize(ctx, Operation::ReadBoard)?;
        let pipeline_id = parse_id("pipelineId", &pipeline_id)?;
        let columns = gql(services(ctx)?.kanban.board(pipeline_id).await)?;
        Ok(columns.into_iter().map(BoardColumnNode::from).collect())
    }

    #[instrument(name = "graphql.crm.activities", skip_all)]
    async fn activities(
        &self,
        ctx: &Context<'_>,
        lead_id: ID,
    ) -> async_graphql::Result<Vec<ActivityNode>> {
        authorize(ctx, Operation::ReadBoard)?;
        let lead_id = parse_id("leadId", &lead_id)?;
        let entries = gql(services(ctx)?.activity.for_lead(lead_id).await)?;
        Ok(entries.into_iter().map(ActivityNode::from).collect())
    }

    #[instrument(name = "graphql.crm.sla_status", skip_all)]
    async fn sla_status(
        &self,
        ctx: &Context<'_>,
        lead_id: ID,
    ) -> async_graphql::Result<SlaStatusNode> {
        authorize(ctx, Operation::ReadBoard)?;
        let lead_id = parse_id("leadId", &lead_id)?;
        let status = gql(services(ctx)?.sla.check_overdue(lead_id).await)?;
        Ok(status.into())
    }

    #[instrument(name = "graphql.crm.sla_stats", skip_all)]
    async fn sla_stats(
        &self,
        ctx: &Context<'_>,
        pipeline_id: ID,
    ) -> async_graphql::Result<SlaStatsNode> {
        authorize(ctx, Operation::ReadBoard)?;
        let pipeline_id = parse_id("pipelineId", &pipeline_id)?;
        Ok(services(ctx)?.sla.sla_stats_by_pipeline(pipeline_id).await.into())
    }
}

#[Object]
impl CrmMutation {
    #[instrument(name = "graphql.crm.create_pipeline", skip_all)]
    async fn create_pipeline(
        &self,
        ctx: &Context<'_>,
        key: String,
        name: String,
    ) -> async_graphql::Result<PipelineNode> {
        authorize(ctx, Operation::ManageStages)?;
        let created = gql(services(ctx)?.stages.create_pipeline(&key, &name).await)?;
        Ok(created.into())
    }

    #[instrument(name = "graphql.crm.create_stage", skip_all)]
    async fn create_stage(
        &self,
        ctx: &Context<'_>,
        pipeline_id: ID,
        input: NewStageInput,
    ) -> async_graphql::Result<StageNode> {
        authorize(ctx, Operation::ManageStages)?;
        let pipeline_id = parse_id("pipelineId", &pipeline_id)?;
        let created = gql(
            services(ctx)?
                .stages
                .create_stage(pipeline_id, input.into())
                .await,
        )?;
        Ok(created.into())
    }

    #[instrument(name = "graphql.crm.reorder_stages", skip_all)]
    async fn reorder_stages(
        &self,
        ctx: &Context<'_>,
        pipeline_id: ID,
        stage_ids: Vec<ID>,
    ) -> async_graphql::Result<Vec<StageNode>> {
        authorize(ctx, Operation::ManageStages)?;
        let pipeline_id = parse_id("pipelineId", &pipeline_id)?;
        let ordered = stage_ids
            .iter()
            .map(|id| parse_id("stageIds", id))
            .collect::<async_graphql::Result<Vec<_>>>()?;
        let stages = gql(
            services(ctx)?
                .stages
                .reorder_stages(pipeline_id, &ordered)
                .await,
        )?;
        Ok(stages.into_iter().map(StageNode::from).collect())
    }

    #[instrument(name = "graphql.crm.delete_stage", skip_all)]
    async fn delete_stage(
        &self,
        ctx: &Context<'_>,
        stage_id: ID,
    ) -> async_graphql::Result<bool> {
        authorize(ctx, Operation::ManageStages)?;
        let stage_id = parse_id("stageId", &stage_id)?;
        gql(services(ctx)?.stages.delete_stage(stage_id).await)?;
        Ok(true)
    }

    #[instrument(name = "graphql.crm.move_card", skip_all)]
    async fn move_card(
        &self,
        ctx: &Context<'_>,
        input: MoveCardInput,
    ) -> async_graphql::Result<LeadNode> {
        let caller = authorize(ctx, Operation::MoveCard)?;
        let moved = gql(services(ctx)?.kanban.move_card(&caller, input.into()).await)?;
        Ok(moved.into())
    }

    #[instrument(name = "graphql.crm.ingest_lead", skip_all)]
    async fn ingest_lead(
        &self,
        ctx: &Context<'_>,
        input: NewLeadInput,
    ) -> async_graphql::Result<IngestPayload> {
        let caller = authorize(ctx, Operation::IngestLead)?;
        let request = gql(input.into_new_lead())?;
        let outcome = gql(services(ctx)?.intake.ingest_lead(&caller, request).await)?;
        Ok(outcome.into())
    }

    #[instrument(name = "graphql.crm.calculate_due_date", skip_all)]
    async fn calculate_due_date(
        &self,
        ctx: &Context<'_>,
        lead_id: ID,
        stage_id: ID,
        entered_at: Option<DateTime<Utc>>,
    ) -> async_graphql::Result<Option<DateTime<Utc>>> {
        authorize(ctx, Operation::RunSla)?;
        let lead_id = parse_id("leadId", &lead_id)?;
        let stage_id = parse_id("stageId", &stage_id)?;
        let due = gql(
            services(ctx)?
                .sla
                .calculate_due_date(lead_id, stage_id, entered_at)
                .await,
        )?;
        Ok(due.map(Into::into))
    }

    #[instrument(name = "graphql.crm.sweep_sla", skip_all)]
    async fn sweep_sla(&self, ctx: &Context<'_>) -> async_graphql::Result<SweepSummaryNode> {
        authorize(ctx, Operation::RunSla)?;
        let summary = gql(services(ctx)?.sla.update_all_overdue_leads().await)?;
        Ok(summary.into())
    }
}

#[Subscription]
impl SubscriptionRoot {
    /// Realtime board changes for one pipeline.
    async fn board_events(
        &self,
        ctx: &Context<'_>,
        pipeline_id: ID,
    ) -> async_graphql::Result<impl Stream<Item = BoardEvent>> {
        authorize(ctx, Operation::ReadBoard)?;
        let channel = pipeline_channel(parse_id("pipelineId", &pipeline_id)?);
        let rx = ctx
            .data::<Arc<BroadcastNotifier>>()
            .map_err(|_| internal_error(anyhow!("realtime notifier missing")))?
            .subscribe();
        Ok(stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) if event.channel == channel => {
                            return Some((BoardEvent::from(event), rx));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "board subscriber lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        }))
    }
}

fn services<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a Crm> {
    ctx.data::<Crm>()
        .map_err(|_| internal_error(anyhow!("workflow services missing")))
}

fn authorize(ctx: &Context<'_>, operation: Operation) -> async_graphql::Result<RequestContext> {
    let caller = ctx
        .data_opt::<RequestContext>()
        .cloned()
        .unwrap_or_else(anonymous);
    let permissions = ctx
        .data::<Arc<PermissionTable>>()
        .map_err(|_| internal_error(anyhow!("permission table missing")))?;
    permissions
        .check(caller.role.as_str(), operation)
        .map_err(|err| ApiError::forbidden(err.to_string()).extend())?;
    Ok(caller)
}

fn gql<T>(result: ApiResult<T>) -> async_graphql::Result<T> {
    result.map_err(|err| err.extend())
}

fn parse_id(field: &str, id: &ID) -> async_graphql::Result<Uuid> {
    Uuid::parse_str(id.as_str())
        .map_err(|_| ApiError::invalid(format!("{field} is not a valid identifier")).extend())
}

fn to_id(id: Uuid) -> ID {
    ID::from(id.to_string())
}

#[derive(Clone, Debug, InputObject)]
pub struct NewStageInput {
    pub key: String,
    pub name: String,
    pub deadline_hours: i32,
    pub wip_limit: Option<i32>,
    pub enter_roles: Option<Vec<String>>,
    pub exit_roles: Option<Vec<String>>,
    pub is_won: Option<bool>,
    pub is_lost: Option<bool>,
}

impl From<NewStageInput> for NewStage {
    fn from(value: NewStageInput) -> Self {
        NewStage {
            key: value.key,
            name: value.name,
            deadline_hours: value.deadline_hours,
            wip_limit: value.wip_limit,
            enter_roles: value.enter_roles.unwrap_or_default(),
            exit_roles: value.exit_roles.unwrap_or_default(),
            is_won: value.is_won.unwrap_or(false),
            is_lost: value.is_lost.unwrap_or(false),
        }
    }
}

#[derive(Clone, Debug, InputObject)]
pub struct MoveCardInput {
    pub lead_id: ID,
    pub to_stage_id: ID,
    pub before_id: Option<ID>,
    pub after_id: Option<ID>,
    pub expected_version: Option<i32>,
}

impl From<MoveCardInput> for MoveCard {
    fn from(value: MoveCardInput) -> Self {
        MoveCard {
            lead_id: value.lead_id.0,
            to_stage_id: value.to_stage_id.0,
            before_id: value.before_id.map(|id| id.0),
            after_id: value.after_id.map(|id| id.0),
            expected_version: value.expected_version,
        }
    }
}

#[derive(Clone, Debug, InputObject)]
pub struct NewLeadInput {
    pub pipeline_id: ID,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub lives_count: i32,
    pub has_legal_entity: bool,
    pub priority: Option<String>,
    pub score: Option<i32>,
}

impl NewLeadInput {
    fn into_new_lead(self) -> ApiResult<NewLead> {
        let pipeline_id = Uuid::parse_str(self.pipeline_id.as_str())
            .map_err(|_| ApiError::invalid("pipelineId is not a valid identifier"))?;
        let priority = self
            .priority
            .map(|raw| {
                lead::Priority::try_from_value(&raw.trim().to_ascii_lowercase())
                    .map_err(|_| ApiError::invalid(format!("unknown priority '{raw}'")))
            })
            .transpose()?;
        Ok(NewLead {
            pipeline_id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            company: self.company,
            source: self.source,
            lives_count: self.lives_count,
            has_legal_entity: self.has_legal_entity,
            priority,
            score: self.score,
        })
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Pipeline")]
pub struct PipelineNode {
    pub id: ID,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<pipeline::Model> for PipelineNode {
    fn from(model: pipeline::Model) -> Self {
        Self {
            id: to_id(model.id),
            key: model.key,
            name: model.name,
            created_at: model.created_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Stage")]
pub struct StageNode {
    pub id: ID,
    pub pipeline_id: ID,
    pub key: String,
    pub name: String,
    pub order: i32,
    pub deadline_hours: i32,
    pub wip_limit: Option<i32>,
    pub enter_roles: Vec<String>,
    pub exit_roles: Vec<String>,
    pub is_won: bool,
    pub is_lost: bool,
}

impl From<stage::Model> for StageNode {
    fn from(model: stage::Model) -> Self {
        Self {
            enter_roles: model.enter_role_list().unwrap_or_default(),
            exit_roles: model.exit_role_list().unwrap_or_default(),
            id: to_id(model.id),
            pipeline_id: to_id(model.pipeline_id),
            key: model.key,
            name: model.name,
            order: model.sort_order,
            deadline_hours: model.deadline_hours,
            wip_limit: model.wip_limit,
            is_won: model.is_won,
            is_lost: model.is_lost,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Lead")]
pub struct LeadNode {
    pub id: ID,
    pub pipeline_id: ID,
    pub stage_id: ID,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub status: String,
    pub priority: String,
    pub score: i32,
    pub owner_ids: Vec<ID>,
    pub rank: String,
    pub version: i32,
    pub lives_count: i32,
    pub has_legal_entity: bool,
    pub entered_stage_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub is_overdue: bool,
    pub overdue_hours: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<lead::Model> for LeadNode {
    fn from(model: lead::Model) -> Self {
        Self {
            owner_ids: model.owners().into_iter().map(to_id).collect(),
            id: to_id(model.id),
            pipeline_id: to_id(model.pipeline_id),
            stage_id: to_id(model.stage_id),
            name: model.name,
            email: model.email,
            phone: model.phone,
            company: model.company,
            source: model.source,
            status: model.status.to_value(),
            priority: model.priority.to_value(),
            score: model.score,
            rank: model.rank,
            version: model.version,
            lives_count: model.lives_count,
            has_legal_entity: model.has_legal_entity,
            entered_stage_at: model.entered_stage_at.map(Into::into),
            due_date: model.due_date.map(Into::into),
            is_overdue: model.is_overdue,
            overdue_hours: model.overdue_hours,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "BoardColumn")]
pub struct BoardColumnNode {
    pub stage: StageNode,
    pub total_count: i32,
    pub leads: Vec<LeadNode>,
}

impl From<BoardColumn> for BoardColumnNode {
    fn from(column: BoardColumn) -> Self {
        Self {
            total_count: column.leads.len() as i32,
            stage: column.stage.into(),
            leads: column.leads.into_iter().map(LeadNode::from).collect(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Activity")]
pub struct ActivityNode {
    pub id: ID,
    pub lead_id: ID,
    pub seq: i32,
    pub kind: String,
    pub description: String,
    pub actor_id: Option<ID>,
    pub metadata: Json<Value>,
    pub created_at: DateTime<Utc>,
}

impl From<activity::Model> for ActivityNode {
    fn from(model: activity::Model) -> Self {
        Self {
            id: to_id(model.id),
            lead_id: to_id(model.lead_id),
            seq: model.seq,
            kind: model.kind.as_str().to_string(),
            description: model.description,
            actor_id: model.actor_id.map(to_id),
            metadata: Json(model.metadata),
            created_at: model.created_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "SlaStatus")]
pub struct SlaStatusNode {
    pub is_overdue: bool,
    pub overdue_hours: i64,
    pub days_until_due: Option<i64>,
    pub hours_until_due: Option<i64>,
}

impl From<SlaStatus> for SlaStatusNode {
    fn from(status: SlaStatus) -> Self {
        Self {
            is_overdue: status.is_overdue,
            overdue_hours: status.overdue_hours,
            days_until_due: status.days_until_due,
            hours_until_due: status.hours_until_due,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "SlaStats")]
pub struct SlaStatsNode {
    pub total: i64,
    pub on_time: i64,
    pub overdue: i64,
    #[graphql(name = "noSLA")]
    pub no_sla: i64,
    pub avg_overdue_hours: f64,
}

impl From<SlaStats> for SlaStatsNode {
    fn from(stats: SlaStats) -> Self {
        Self {
            total: stats.total as i64,
            on_time: stats.on_time as i64,
            overdue: stats.overdue as i64,
            no_sla: stats.no_sla as i64,
            avg_overdue_hours: stats.avg_overdue_hours,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "SweepSummary")]
pub struct SweepSummaryNode {
    pub total: i64,
    pub overdue: i64,
    pub updated: i64,
}

impl From<SweepSummary> for SweepSummaryNode {
    fn from(summary: SweepSummary) -> Self {
        Self {
            total: summary.total as i64,
            overdue: summary.overdue as i64,
            updated: summary.updated as i64,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct IngestPayload {
    pub lead: LeadNode,
    pub reconverted: bool,
    pub owner_id: Option<ID>,
    /// True when a fresh search replaced the previous owner.
    pub reassigned: bool,
}

impl From<IntakeOutcome> for IngestPayload {
    fn from(outcome: IntakeOutcome) -> Self {
        let resolution = outcome.resolution();
        let reconverted = outcome.is_reconversion();
        let lead = match outcome {
            IntakeOutcome::Created { lead, .. } | IntakeOutcome::Reconverted { lead, .. } => lead,
        };
        Self {
            owner_id: lead.primary_owner().map(to_id),
            reassigned: reconverted && resolution.is_reassignment(),
            reconverted,
            lead: lead.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct BoardEvent {
    pub event: String,
    pub payload: Json<Value>,
}

impl From<RealtimeEvent> for BoardEvent {
    fn from(value: RealtimeEvent) -> Self {
        Self {
            event: value.event,
            payload: Json(value.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::{Request, Variables};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::json;

    async fn schema() -> SchemaType {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&conn, None).await.unwrap();
        let db = Arc::new(conn);
        let realtime = Arc::new(BroadcastNotifier::new(16));
        let crm = Crm::new(db, realtime.clone());
        build_schema(crm, Arc::new(PermissionTable::default()), realtime)
    }

    fn as_role(request: Request, role: Role) -> Request {
        request.data(RequestContext::new(Uuid::new_v4(), role))
    }

    async fn run(schema: &SchemaType, request: Request) -> Value {
        let response = schema.execute(request).await;
        assert!(response.errors.is_empty(), "errors: {:?}", response.errors);
        response.data.into_json().unwrap()
    }

    #[tokio::test]
    async fn schema_exposes_camel_case_names() {
        let sdl = schema().await.sdl();
        assert!(sdl.contains("slaStatus(leadId: ID!)"));
        assert!(sdl.contains("boardEvents(pipelineId: ID!)"));
        assert!(sdl.contains("noSLA:"));
        assert!(!sdl.contains("pipeline_id") && !sdl.contains("lead_id"));
    }

    #[tokio::test]
    async fn pipeline_setup_intake_and_move() {
        let schema = schema().await;
        let data = run(
            &schema,
            as_role(
                Request::new(
                    r#"mutation { crm { createPipeline(key: "sales", name: "Sales") { id key } } }"#,
                ),
                Role::Admin,
            ),
        )
        .await;
        let pipeline_id = data["crm"]["createPipeline"]["id"].as_str().unwrap().to_string();

        let create_stage = r#"
            mutation Stage($pipelineId: ID!, $input: NewStageInput!) {
                crm { createStage(pipelineId: $pipelineId, input: $input) { id order } }
            }
        "#;
        let mut stage_ids = Vec::new();
        for (key, hours) in [("new", 24), ("contacted", 48)] {
            let vars = Variables::from_json(json!({
                "pipelineId": pipeline_id,
                "input": { "key": key, "name": key, "deadlineHours": hours }
            }));
            let data = run(
                &schema,
                as_role(Request::new(create_stage).variables(vars), Role::Manager),
            )
            .await;
            stage_ids.push(data["crm"]["createStage"]["id"].as_str().unwrap().to_string());
        }

        let ingest = r#"
            mutation Ingest($input: NewLeadInput!) {
                crm { ingestLead(input: $input) { reconverted lead { id stageId version } } }
            }
        "#;
        let vars = Variables::from_json(json!({
            "input": {
                "pipelineId": pipeline_id,
                "name": "Acme",
                "email": "buyer@acme.test",
                "livesCount": 3,
                "hasLegalEntity": false,
                "priority": "HIGH"
            }
        }));
        let data = run(
            &schema,
            as_role(Request::new(ingest).variables(vars), Role::Seller),
        )
        .await;
        let lead = &data["crm"]["ingestLead"]["lead"];
        assert_eq!(data["crm"]["ingestLead"]["reconverted"], false);
        assert_eq!(lead["stageId"], stage_ids[0].as_str());
        let lead_id = lead["id"].as_str().unwrap().to_string();

        let move_card = r#"
            mutation Move($input: MoveCardInput!) {
                crm { moveCard(input: $input) { stageId version dueDate } }
            }
        "#;
        let vars = Variables::from_json(json!({
            "input": { "leadId": lead_id, "toStageId": stage_ids[1], "expectedVersion": 1 }
        }));
        let data = run(
            &schema,
            as_role(Request::new(move_card).variables(vars), Role::Manager),
        )
        .await;
        assert_eq!(data["crm"]["moveCard"]["stageId"], stage_ids[1].as_str());
        assert_eq!(data["crm"]["moveCard"]["version"], 2);

        let board = format!(
            r#"{{ crm {{ board(pipelineId: "{pipeline_id}") {{ totalCount stage {{ key }} }} }} }}"#
        );
        let data = run(&schema, as_role(Request::new(board), Role::Viewer)).await;
        let columns = data["crm"]["board"].as_array().unwrap();
        assert_eq!(columns[0]["totalCount"], 0);
        assert_eq!(columns[1]["totalCount"], 1);
    }

    #[tokio::test]
    async fn viewers_cannot_manage_stages() {
        let schema = schema().await;
        let response = schema
            .execute(as_role(
                Request::new(
                    r#"mutation { crm { createPipeline(key: "sales", name: "Sales") { id } } }"#,
                ),
                Role::Viewer,
            ))
            .await;
        let err = &response.errors[0];
        let code = err.extensions.as_ref().and_then(|e| e.get("code")).cloned();
        assert_eq!(code, Some(async_graphql::Value::from("FORBIDDEN")));
    }

    #[tokio::test]
    async fn malformed_ids_surface_as_invalid_argument() {
        let schema = schema().await;
        let response = schema
            .execute(as_role(
                Request::new(r#"{ crm { stages(pipelineId: "nope") { id } } }"#),
                Role::Viewer,
            ))
            .await;
        let code = response.errors[0]
            .extensions
            .as_ref()
            .and_then(|e| e.get("code"))
            .cloned();
        assert_eq!(code, Some(async_graphql::Value::from("INVALID_ARGUMENT")));
    }
}

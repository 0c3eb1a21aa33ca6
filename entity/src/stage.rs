use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "stage")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub pipeline_id: Uuid,
    pub key: String,
    pub name: String,
    /// 1-based, dense and unique within the pipeline.
    pub sort_order: i32,
    /// 0 means the stage carries no SLA.
    pub deadline_hours: i32,
    pub wip_limit: Option<i32>,
    /// JSON array of role names allowed to move cards into the stage.
    pub enter_roles: Option<Json>,
    /// JSON array of role names allowed to move cards out of the stage.
    pub exit_roles: Option<Json>,
    pub is_won: bool,
    pub is_lost: bool,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pipeline::Entity",
        from = "Column::PipelineId",
        to = "super::pipeline::Column::Id",
        on_delete = "Cascade"
    )]
    Pipeline,
    #[sea_orm(has_many = "super::lead::Entity")]
    Lead,
}

impl Related<super::pipeline::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pipeline.def()
    }
}

impl Related<super::lead::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lead.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn has_sla(&self) -> bool {
        self.deadline_hours > 0
    }

    pub fn enter_role_list(&self) -> Option<Vec<String>> {
        role_list(self.enter_roles.as_ref())
    }

    pub fn exit_role_list(&self) -> Option<Vec<String>> {
        role_list(self.exit_roles.as_ref())
    }
}

fn role_list(raw: Option<&Json>) -> Option<Vec<String>> {
    let roles: Vec<String> = raw?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_ascii_lowercase()))
        .collect();
    if roles.is_empty() { None } else { Some(roles) }
}

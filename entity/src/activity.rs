use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "activity")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub lead_id: Uuid,
    /// Position in the lead's timeline, starting at 1.
    pub seq: i32,
    pub kind: Kind,
    pub description: String,
    pub actor_id: Option<Uuid>,
    pub metadata: Json,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::lead::Entity",
        from = "Column::LeadId",
        to = "super::lead::Column::Id",
        on_delete = "Cascade"
    )]
    Lead,
}

impl Related<super::lead::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lead.def()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Hash)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
pub enum Kind {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "stage_changed")]
    StageChanged,
    #[sea_orm(string_value = "owner_assigned")]
    OwnerAssigned,
    #[sea_orm(string_value = "owner_reassigned")]
    OwnerReassigned,
    #[sea_orm(string_value = "reconverted")]
    Reconverted,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Created => "created",
            Kind::StageChanged => "stage_changed",
            Kind::OwnerAssigned => "owner_assigned",
            Kind::OwnerReassigned => "owner_reassigned",
            Kind::Reconverted => "reconverted",
        }
    }
}

impl ActiveModelBehavior for ActiveModel {}

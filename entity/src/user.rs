use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub is_active: bool,
    pub distribution_active: bool,
    pub min_lives: Option<i32>,
    pub max_lives: Option<i32>,
    pub cnpj_rule: Option<CnpjRule>,
    pub last_assigned_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        panic!("no relations")
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Legal-entity (CNPJ) requirement an owner places on the leads they accept.
#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Hash)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
pub enum CnpjRule {
    #[sea_orm(string_value = "required")]
    Required,
    #[sea_orm(string_value = "forbidden")]
    Forbidden,
    #[sea_orm(string_value = "both")]
    Both,
}

pub use sea_orm_migration::prelude::*;

mod m20250301_000001_pipeline_stage;
mod m20250301_000002_lead_workflow;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_pipeline_stage::Migration),
            Box::new(m20250301_000002_lead_workflow::Migration),
        ]
    }
}

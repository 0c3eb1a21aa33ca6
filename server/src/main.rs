mod config;
mod graphql;
mod http;
mod jobs;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crm::{BroadcastNotifier, Crm, NewStage};
use entity::pipeline;
use migration::{Migrator, MigratorTrait};
use platform_authz::PermissionTable;
use platform_db::{DatabaseSettings, DbPool, connect};
use platform_obs::{ObsConfig, init_tracing, shutdown_tracing};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tracing::info;

use crate::{
    config::AppConfig,
    http::{AppState, ServeConfig},
};

#[derive(Parser, Debug)]
#[command(name = "leadflow", version, about = "Lead workflow server")]
struct Cli {
    /// Overrides RUST_LOG for this invocation.
    #[arg(long, global = true, env = "LEADFLOW_LOG")]
    log: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP + GraphQL server.
    Serve(ServeCommand),
    /// Run database migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),
    /// SLA maintenance.
    #[command(subcommand)]
    Sla(SlaCommand),
    /// Activity log maintenance.
    #[command(subcommand)]
    Activities(ActivitiesCommand),
    /// Create the demo sales pipeline if it is missing.
    Seed,
    /// Print the GraphQL schema snapshot.
    #[command(name = "schema:print")]
    SchemaPrint {
        #[arg(long, value_name = "FILE", help = "Destination file path")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations.
    Up,
    /// Rollback the most recent migration.
    Down,
}

#[derive(Subcommand, Debug)]
enum SlaCommand {
    /// Recompute overdue flags for every lead once.
    Sweep,
}

#[derive(Subcommand, Debug)]
enum ActivitiesCommand {
    /// Delete entries older than the retention window.
    Purge {
        #[arg(long, help = "Retention in days (defaults to ACTIVITY_RETENTION_DAYS)")]
        days: Option<i64>,
    },
}

#[derive(Args, Debug)]
struct ServeCommand {
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, help = "Allow starting even when migrations are pending")]
    allow_dirty: bool,
}

impl From<&ServeCommand> for ServeConfig {
    fn from(value: &ServeCommand) -> Self {
        ServeConfig::new(value.host, value.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut obs = ObsConfig::default();
    if let Some(filter) = cli.log.clone() {
        obs = obs.with_filter(filter);
    }
    init_tracing(obs)?;
    let app_config = Arc::new(AppConfig::load()?);
    let result = match cli.command {
        Command::Serve(cmd) => run_server(cmd, app_config).await,
        Command::Migrate(action) => match action {
            MigrateCommand::Up => migrate_up().await,
            MigrateCommand::Down => migrate_down().await,
        },
        Command::Sla(SlaCommand::Sweep) => run_sla_sweep(&app_config).await,
        Command::Activities(ActivitiesCommand::Purge { days }) => {
            run_activity_purge(&app_config, days).await
        }
        Command::Seed => run_seed(&app_config).await,
        Command::SchemaPrint { output } => schema_print(&app_config, output).await,
    };
    shutdown_tracing();
    result
}

async fn setup_pool() -> Result<Arc<DbPool>> {
    let settings = DatabaseSettings::from_env()?;
    let pool = connect(&settings).await?;
    Ok(Arc::new(pool))
}

fn workflow(pool: Arc<DbPool>, config: &AppConfig) -> (Crm, Arc<BroadcastNotifier>) {
    let realtime = Arc::new(BroadcastNotifier::new(config.realtime_buffer));
    (Crm::new(pool, realtime.clone()), realtime)
}

async fn run_server(cmd: ServeCommand, config: Arc<AppConfig>) -> Result<()> {
    let pool = setup_pool().await?;
    ensure_migrations(pool.as_ref(), cmd.allow_dirty).await?;
    let (crm, realtime) = workflow(pool.clone(), &config);
    let sweeper = config
        .sla_sweep_interval
        .map(|every| jobs::spawn_sla_sweeper(crm.sla.clone(), every));
    let schema = graphql::build_schema(crm, Arc::new(PermissionTable::default()), realtime);
    let state = AppState {
        pool,
        schema,
        config: config.clone(),
    };
    let result = http::serve((&cmd).into(), state).await;
    if let Some(handle) = sweeper {
        handle.abort();
    }
    result
}

async fn ensure_migrations(pool: &DbPool, allow_dirty: bool) -> Result<()> {
    let pending = Migrator::get_pending_migrations(pool).await?;
    if !pending.is_empty() && !allow_dirty {
        anyhow::bail!(
            "pending migrations detected; run `cargo run -p server -- migrate up` or pass --allow-dirty"
        );
    }
    Ok(())
}

async fn migrate_up() -> Result<()> {
    let pool = setup_pool().await?;
    Migrator::up(pool.as_ref(), None).await?;
    info!("database migrations applied");
    Ok(())
}

async fn migrate_down() -> Result<()> {
    let pool = setup_pool().await?;
    Migrator::down(pool.as_ref(), Some(1)).await?;
    info!("most recent migration rolled back");
    Ok(())
}

async fn run_sla_sweep(config: &AppConfig) -> Result<()> {
    let pool = setup_pool().await?;
    let (crm, _) = workflow(pool, config);
    let summary = crm.sla.update_all_overdue_leads().await?;
    info!(
        total = summary.total,
        overdue = summary.overdue,
        updated = summary.updated,
        "sla sweep finished"
    );
    Ok(())
}

async fn run_activity_purge(config: &AppConfig, days: Option<i64>) -> Result<()> {
    let pool = setup_pool().await?;
    let (crm, _) = workflow(pool, config);
    let retention = days.unwrap_or(config.activity_retention_days);
    jobs::purge_activities(&crm.activity, retention).await?;
    Ok(())
}

const DEMO_PIPELINE: &str = "sales";

async fn run_seed(config: &AppConfig) -> Result<()> {
    let pool = setup_pool().await?;
    let existing = pipeline::Entity::find()
        .filter(pipeline::Column::Key.eq(DEMO_PIPELINE))
        .one(pool.as_ref())
        .await?;
    if let Some(found) = existing {
        info!(pipeline_id = %found.id, "demo pipeline already present");
        return Ok(());
    }

    let (crm, _) = workflow(pool, config);
    let created = crm.stages.create_pipeline(DEMO_PIPELINE, "Sales").await?;
    let stages = [
        NewStage::new("new", "New", 24),
        NewStage::new("contacted", "Contacted", 48),
        NewStage::new("proposal", "Proposal", 72)
            .wip_limit(25)
            .enter_roles(["manager", "seller"]),
        NewStage::new("won", "Won", 0).won().exit_roles(["manager"]),
        NewStage::new("lost", "Lost", 0).lost().exit_roles(["manager"]),
    ];
    for stage in stages {
        crm.stages
            .create_stage(created.id, stage)
            .await
            .context("failed to seed demo stage")?;
    }
    info!(pipeline_id = %created.id, "demo pipeline seeded");
    Ok(())
}

async fn schema_print(config: &AppConfig, path: Option<PathBuf>) -> Result<()> {
    let target = path.unwrap_or_else(|| PathBuf::from("schema.graphql"));
    // Resolvers never run while printing, so an empty in-memory database is enough.
    let pool = Arc::new(sea_orm::Database::connect("sqlite::memory:").await?);
    let (crm, realtime) = workflow(pool, config);
    let schema = graphql::build_schema(crm, Arc::new(PermissionTable::default()), realtime);
    std::fs::write(&target, schema.sdl())
        .with_context(|| format!("failed to write {}", target.display()))?;
    info!(path = %target.display(), "schema snapshot written");
    Ok(())
}

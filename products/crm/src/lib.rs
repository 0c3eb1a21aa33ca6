//! Lead workflow core: stage graph, card ranking, SLA clock, owner
//! distribution, kanban moves and the activity trail.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

pub mod activity;
pub mod context;
pub mod distribution;
pub mod intake;
pub mod kanban;
pub mod notify;
pub mod rank;
pub mod sla;
pub mod stages;

pub use context::{RequestContext, Role};
pub use distribution::{
    CandidateFinder, Distributor, LeastRecentlyAssigned, OwnerResolution, mark_assigned,
};
pub use intake::{IntakeOutcome, LeadIntake, NewLead};
pub use kanban::{BoardColumn, KanbanMover, MoveCard};
pub use notify::{BroadcastNotifier, Notifier, NoopNotifier};
pub use platform_api::{ApiError, ApiResult};
pub use sla::{SlaClock, SlaStats, SlaStatus, SweepSummary};
pub use stages::{NewStage, StageGraph};

/// All workflow services wired against one database and one notifier.
#[derive(Clone)]
pub struct Crm {
    pub stages: StageGraph,
    pub kanban: KanbanMover,
    pub sla: SlaClock,
    pub distribution: Distributor,
    pub intake: LeadIntake,
    pub activity: activity::ActivityLog,
}

impl Crm {
    /// Uses the least-recently-assigned rotation for owner search.
    pub fn new(db: Arc<DatabaseConnection>, notifier: Arc<dyn Notifier>) -> Self {
        let finder = Arc::new(LeastRecentlyAssigned::new(db.clone()));
        Self::with_finder(db, notifier, finder)
    }

    pub fn with_finder(
        db: Arc<DatabaseConnection>,
        notifier: Arc<dyn Notifier>,
        finder: Arc<dyn CandidateFinder>,
    ) -> Self {
        let distribution = Distributor::new(db.clone(), finder);
        Self {
            stages: StageGraph::new(db.clone()),
            kanban: KanbanMover::new(db.clone(), notifier.clone()),
            sla: SlaClock::new(db.clone()),
            intake: LeadIntake::new(db.clone(), distribution.clone(), notifier),
            distribution,
            activity: activity::ActivityLog::new(db),
        }
    }
}

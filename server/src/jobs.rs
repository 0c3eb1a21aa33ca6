//! Background work owned by the server process.

use std::time::Duration;

use chrono::Utc;
use crm::{SlaClock, activity::ActivityLog};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Recomputes overdue flags every `every`. The first sweep waits one full
/// period so startup does not race the migrations check.
pub fn spawn_sla_sweeper(sla: SlaClock, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sla.update_all_overdue_leads().await {
                Ok(summary) => info!(
                    total = summary.total,
                    overdue = summary.overdue,
                    updated = summary.updated,
                    "periodic sla sweep finished"
                ),
                Err(err) => warn!(error = %err, "periodic sla sweep failed"),
            }
        }
    })
}

/// Deletes activity entries older than `retention_days`.
pub async fn purge_activities(log: &ActivityLog, retention_days: i64) -> anyhow::Result<u64> {
    if retention_days < 1 {
        anyhow::bail!("retention must be at least one day");
    }
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let removed = log.purge_before(cutoff).await?;
    info!(removed, %cutoff, "activity log purged");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    #[tokio::test]
    async fn purge_rejects_non_positive_retention() {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&conn, None).await.unwrap();
        let log = ActivityLog::new(Arc::new(conn));
        assert!(purge_activities(&log, 0).await.is_err());
        assert_eq!(purge_activities(&log, 30).await.unwrap(), 0);
    }
}

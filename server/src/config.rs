use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub cors_allowed_origins: Vec<String>,
    /// `None` turns the in-process SLA sweep off.
    pub sla_sweep_interval: Option<Duration>,
    pub activity_retention_days: i64,
    pub realtime_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cors_allowed_origins: vec!["http://localhost:5173".into()],
            sla_sweep_interval: Some(Duration::from_secs(300)),
            activity_retention_days: 365,
            realtime_buffer: 256,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let cors_allowed_origins = match std::env::var("CORS_ALLOWED_ORIGINS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => defaults.cors_allowed_origins,
        };

        let sweep_secs: u64 = env_or("SLA_SWEEP_INTERVAL_SECS", 300)?;
        let sla_sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));

        let activity_retention_days = env_or("ACTIVITY_RETENTION_DAYS", 365)?;
        if activity_retention_days < 1 {
            anyhow::bail!("ACTIVITY_RETENTION_DAYS must be at least 1");
        }

        Ok(Self {
            cors_allowed_origins,
            sla_sweep_interval,
            activity_retention_days,
            realtime_buffer: env_or("REALTIME_BUFFER", defaults.realtime_buffer)?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

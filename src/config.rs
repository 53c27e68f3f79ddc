use std::env;
use std::time::Duration;

use anyhow::Context;

/// Process configuration, read from the environment (and `.env` via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    pub redis_url: String,
    pub raffle: RaffleConfig,
}

/// Timing knobs for the raffle core.
#[derive(Debug, Clone)]
pub struct RaffleConfig {
    pub monitor_interval: Duration,
    pub lock_ttl_secs: u64,
    /// How long a drawn winner has to confirm, issue or withdraw.
    pub confirm_window_secs: u64,
    /// Spawn a monitor after start/open/draw/status. Tests switch this off and
    /// drive `Monitor` by hand.
    pub auto_monitor: bool,
}

impl Default for RaffleConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(5),
            lock_ttl_secs: 7,
            confirm_window_secs: 10 * 60,
            auto_monitor: true,
        }
    }
}

fn env_u64(name: &str, default: u64) -> anyhow::Result<u64> {
    match env::var(name) {
        Ok(v) => v.parse().with_context(|| format!("{name} must be a whole number of seconds")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = RaffleConfig::default();
        let raffle = RaffleConfig {
            monitor_interval: Duration::from_secs(env_u64(
                "RAFFLE_MONITOR_INTERVAL_SECS",
                defaults.monitor_interval.as_secs(),
            )?),
            lock_ttl_secs: env_u64("RAFFLE_LOCK_TTL_SECS", defaults.lock_ttl_secs)?,
            confirm_window_secs: env_u64("RAFFLE_CONFIRM_WINDOW_SECS", defaults.confirm_window_secs)?,
            auto_monitor: true,
        };
        if raffle.lock_ttl_secs <= raffle.monitor_interval.as_secs() {
            anyhow::bail!("RAFFLE_LOCK_TTL_SECS must be longer than RAFFLE_MONITOR_INTERVAL_SECS");
        }

        Ok(Self {
            discord_token: env::var("DISCORD_TOKEN").context("DISCORD_TOKEN not set")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            raffle,
        })
    }
}

//! Service Configuration
//! Mission: One typed view of flags, environment and `.env`
//!
//! Every setting is a CLI flag with an environment fallback. `.env` files
//! are loaded before parsing so they behave like exported variables.

use crate::feed::WritePolicy;
use crate::middleware::RateLimitConfig;
use crate::scheduler::{schedule_from_config, CleanupPolicy, CleanupSchedule};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_JWT_SECRET: &str = "dev-secret-change-in-production-minimum-32-characters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CleanupMode {
    /// Empty both indexes
    Clear,
    /// Drop records older than the retention window
    Expire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PruneMode {
    /// Prune on every write
    Inline,
    /// Leave pruning to the nightly job
    Scheduled,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "market-feed")]
#[command(about = "Crowd-sourced market price feed backend")]
pub struct Config {
    /// Deployment environment (dev, prod)
    #[arg(long, env = "APP_ENV", default_value = "dev")]
    pub app_env: String,

    /// HTTP port; a leading ':' is tolerated
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: String,

    /// Full Redis URL; overrides REDIS_ADDR / REDIS_PASSWORD
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "REDIS_ADDR", default_value = "localhost:6379")]
    pub redis_addr: String,

    #[arg(long, env = "REDIS_PASSWORD", default_value = "", hide_env_values = true)]
    pub redis_password: String,

    /// Run against the in-process store instead of Redis (data is lost on exit)
    #[arg(long, env = "MEMORY_STORE")]
    pub memory_store: bool,

    #[arg(long, env = "JWT_SECRET", default_value = DEFAULT_JWT_SECRET, hide_env_values = true)]
    pub jwt_secret: String,

    /// Admin account ensured at startup (skipped when empty)
    #[arg(long, env = "ADMIN_USERNAME", default_value = "")]
    pub admin_username: String,

    #[arg(long, env = "ADMIN_PASSWORD", default_value = "", hide_env_values = true)]
    pub admin_password: String,

    /// Daily cleanup time, HH:MM
    #[arg(long, env = "CLEANUP_TIME", default_value = "00:00")]
    pub cleanup_time: String,

    /// Local, UTC, a fixed offset such as +08:00, or an IANA name such as Asia/Shanghai
    #[arg(long, env = "CLEANUP_TIMEZONE", default_value = "Local")]
    pub cleanup_timezone: String,

    #[arg(long, env = "CLEANUP_MODE", value_enum, default_value = "clear")]
    pub cleanup_mode: CleanupMode,

    #[arg(long, env = "CLEANUP_RETENTION_HOURS", default_value = "24")]
    pub cleanup_retention_hours: u64,

    #[arg(long, env = "FEED_PRUNE_MODE", value_enum, default_value = "inline")]
    pub feed_prune_mode: PruneMode,

    #[arg(long, env = "FEED_RETENTION_HOURS", default_value = "24")]
    pub feed_retention_hours: u64,

    /// Price index size cap under inline pruning; 0 disables
    #[arg(long, env = "FEED_PRICE_CAP", default_value = "5000")]
    pub feed_price_cap: usize,

    /// Upper bound for each feed store round trip
    #[arg(long, env = "FEED_OP_TIMEOUT_MS", default_value = "5000")]
    pub feed_op_timeout_ms: u64,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "15")]
    pub request_timeout_secs: u64,

    #[arg(long, env = "RATE_LIMIT_MAX", default_value = "10")]
    pub rate_limit_max: u32,

    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value = "30")]
    pub rate_limit_window_secs: u64,
}

impl Config {
    /// Load `.env`, then parse flags and environment
    pub fn load() -> Self {
        load_env();
        Self::parse()
    }

    pub fn port(&self) -> Result<u16> {
        let raw = self.port.trim();
        raw.strip_prefix(':')
            .unwrap_or(raw)
            .parse()
            .with_context(|| format!("Invalid PORT {:?}", self.port))
    }

    pub fn is_production(&self) -> bool {
        matches!(self.app_env.as_str(), "prod" | "production")
    }

    pub fn redis_url(&self) -> String {
        if let Some(url) = self.redis_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.trim().to_string();
        }
        let addr = self.redis_addr.trim();
        if self.redis_password.is_empty() {
            format!("redis://{addr}/0")
        } else {
            format!("redis://:{}@{addr}/0", encode_userinfo(&self.redis_password))
        }
    }

    pub fn write_policy(&self) -> WritePolicy {
        match self.feed_prune_mode {
            PruneMode::Scheduled => WritePolicy::ScheduledOnly,
            PruneMode::Inline => WritePolicy::InlinePrune {
                retention: Duration::from_secs(self.feed_retention_hours * 3600),
                price_cap: (self.feed_price_cap > 0).then_some(self.feed_price_cap),
            },
        }
    }

    pub fn cleanup_policy(&self) -> CleanupPolicy {
        match self.cleanup_mode {
            CleanupMode::Clear => CleanupPolicy::ClearAll,
            CleanupMode::Expire => CleanupPolicy::Expire {
                retention: Duration::from_secs(self.cleanup_retention_hours * 3600),
            },
        }
    }

    pub fn cleanup_schedule(&self) -> CleanupSchedule {
        schedule_from_config(&self.cleanup_time, &self.cleanup_timezone)
    }

    pub fn feed_op_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_op_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max,
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }

    /// Startup warnings for settings that are fine in dev but not in prod
    pub fn warn_insecure_defaults(&self) {
        if self.jwt_secret == DEFAULT_JWT_SECRET {
            if self.is_production() {
                warn!("⚠️  JWT_SECRET is the built-in default in production, set a real secret!");
            } else {
                warn!("⚠️  Using default JWT_SECRET (dev only)");
            }
        }
    }
}

/// Percent-encode a password for the userinfo part of a URL
fn encode_userinfo(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Load `.env` from the working directory (and parents), then the crate root
pub fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["market-feed"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_port_tolerates_colon() {
        assert_eq!(parse(&["--port", ":9000"]).port().unwrap(), 9000);
        assert_eq!(parse(&["--port", "8081"]).port().unwrap(), 8081);
        assert!(parse(&["--port", "http"]).port().is_err());
    }

    #[test]
    fn test_redis_url_building() {
        let cfg = parse(&["--redis-addr", "cache:6380"]);
        assert_eq!(cfg.redis_url(), "redis://cache:6380/0");

        let cfg = parse(&["--redis-addr", "cache:6380", "--redis-password", "p@ss"]);
        assert_eq!(cfg.redis_url(), "redis://:p%40ss@cache:6380/0");

        let cfg = parse(&["--redis-url", "redis://other:1/2", "--redis-password", "x"]);
        assert_eq!(cfg.redis_url(), "redis://other:1/2");
    }

    #[test]
    fn test_write_policy_resolution() {
        let cfg = parse(&["--feed-prune-mode", "scheduled"]);
        assert_eq!(cfg.write_policy(), WritePolicy::ScheduledOnly);

        let cfg = parse(&["--feed-retention-hours", "12", "--feed-price-cap", "0"]);
        assert_eq!(
            cfg.write_policy(),
            WritePolicy::InlinePrune {
                retention: Duration::from_secs(12 * 3600),
                price_cap: None,
            }
        );
    }

    #[test]
    fn test_cleanup_policy_resolution() {
        let cfg = parse(&["--cleanup-mode", "expire", "--cleanup-retention-hours", "6"]);
        assert_eq!(
            cfg.cleanup_policy(),
            CleanupPolicy::Expire {
                retention: Duration::from_secs(6 * 3600)
            }
        );
        assert!(Config::try_parse_from(["market-feed", "--cleanup-mode", "nuke"]).is_err());
    }
}

//! Nightly Feed Cleanup
//! Mission: Bound feed growth on a daily wall-clock schedule
//!
//! Once a day at `HH:MM` in the configured zone the scheduler either
//! empties both feed indexes or expires records past a retention window.
//! Each run is capped by a hard timeout and leaves an audit entry.

use crate::admin::{AdminLogEntry, AdminLogKind, AdminStore};
use crate::feed::{FeedError, FeedStore, RemovalCounts, RemovalProgress};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Days, FixedOffset, Local, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// What a cleanup run does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Drop every record from both indexes
    ClearAll,
    /// Drop records older than `retention`
    Expire { retention: Duration },
}

impl CleanupPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupPolicy::ClearAll => "clear",
            CleanupPolicy::Expire { .. } => "expire",
        }
    }
}

/// Zone the daily `HH:MM` is interpreted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupZone {
    Local,
    Fixed(FixedOffset),
    /// IANA zone such as `Asia/Shanghai`; DST shifts follow the zone rules
    Named(Tz),
}

impl CleanupZone {
    /// Accepts `Local`, `UTC` (or `Z`), fixed offsets such as `+08:00` / `-0530`
    /// and IANA zone names
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("local") {
            return Ok(CleanupZone::Local);
        }
        if raw.eq_ignore_ascii_case("utc") || raw.eq_ignore_ascii_case("z") || raw == "Etc/UTC" {
            return Ok(CleanupZone::Fixed(FixedOffset::east_opt(0).context("zero offset")?));
        }

        let (sign, rest) = match raw.as_bytes()[0] {
            b'+' => (1, &raw[1..]),
            b'-' => (-1, &raw[1..]),
            _ => {
                return raw
                    .parse::<Tz>()
                    .map(CleanupZone::Named)
                    .map_err(|e| anyhow::anyhow!("unsupported timezone {raw:?}: {e}"));
            }
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            bail!("malformed offset {raw:?}");
        }
        let hours: i32 = digits[..2].parse()?;
        let minutes: i32 = digits[2..].parse()?;
        if hours > 14 || minutes > 59 {
            bail!("offset out of range {raw:?}");
        }
        let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .with_context(|| format!("offset out of range {raw:?}"))?;
        Ok(CleanupZone::Fixed(offset))
    }
}

/// Parse a 24-hour `HH:MM` wall-clock time (`24:00` is rejected)
pub fn parse_cleanup_time(raw: &str) -> Result<(u32, u32)> {
    use chrono::Timelike;
    let parsed = NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .with_context(|| format!("invalid cleanup time {raw:?}, expected HH:MM"))?;
    Ok((parsed.hour(), parsed.minute()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSchedule {
    pub time: NaiveTime,
    pub zone: CleanupZone,
}

impl Default for CleanupSchedule {
    fn default() -> Self {
        Self {
            time: NaiveTime::MIN,
            zone: CleanupZone::Local,
        }
    }
}

impl CleanupSchedule {
    pub fn new(hour: u32, minute: u32, zone: CleanupZone) -> Result<Self> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .with_context(|| format!("invalid time {hour:02}:{minute:02}"))?;
        Ok(Self { time, zone })
    }

    /// First occurrence of the daily time strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.zone {
            CleanupZone::Local => next_in_zone(now, &Local, self.time),
            CleanupZone::Fixed(offset) => next_in_zone(now, &offset, self.time),
            CleanupZone::Named(tz) => next_in_zone(now, &tz, self.time),
        }
    }
}

fn next_in_zone<Z: TimeZone>(now: DateTime<Utc>, tz: &Z, time: NaiveTime) -> DateTime<Utc> {
    let mut date = now.with_timezone(tz).date_naive();
    // Three days covers "later today", "tomorrow" and a skipped DST gap
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > now {
                return candidate;
            }
        }
        match date.checked_add_days(Days::new(1)) {
            Some(next) => date = next,
            None => break,
        }
    }
    now + chrono::Duration::hours(24)
}

/// Drives [`CleanupPolicy`] against the feed once a day
pub struct CleanupScheduler {
    feed: FeedStore,
    admin: Arc<AdminStore>,
    schedule: CleanupSchedule,
    policy: CleanupPolicy,
    run_timeout: Duration,
}

impl CleanupScheduler {
    pub fn new(
        feed: FeedStore,
        admin: Arc<AdminStore>,
        schedule: CleanupSchedule,
        policy: CleanupPolicy,
    ) -> Self {
        Self {
            feed,
            admin,
            schedule,
            policy,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// One cleanup pass under the run timeout, with an audit entry either way
    pub async fn run_once(&self) -> Result<RemovalCounts, FeedError> {
        let progress = RemovalProgress::default();
        let work = async {
            match self.policy {
                CleanupPolicy::ClearAll => self.feed.clear_all_with(&progress).await,
                CleanupPolicy::Expire { retention } => {
                    let cutoff = self.feed.now_millis() - retention.as_millis() as i64;
                    self.feed.expire_older_than_with(cutoff, &progress).await
                }
            }
        };
        // On expiry the work future is dropped; whatever it already removed is still reported
        let result = match tokio::time::timeout(self.run_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::interrupted(
                progress.snapshot(),
                FeedError::Timeout(self.run_timeout),
            )),
        };

        let mode = self.policy.as_str();
        match &result {
            Ok(removed) => {
                info!(
                    "🧹 Cleanup finished ({}): removed {} time records, {} price records",
                    mode, removed.time, removed.price
                );
                self.audit(format!("nightly {mode} cleanup finished"), *removed, false)
                    .await;
            }
            Err(e) => {
                let removed = e.removed();
                error!(
                    mode,
                    removed_time = removed.time,
                    removed_price = removed.price,
                    "Cleanup failed: {}",
                    e
                );
                self.audit(format!("nightly {mode} cleanup failed: {e}"), removed, true)
                    .await;
            }
        }
        result
    }

    async fn audit(&self, message: String, removed: RemovalCounts, failed: bool) {
        let mut entry = AdminLogEntry::new(AdminLogKind::FeedCleanup, message)
            .meta("mode", self.policy.as_str())
            .meta("removedTime", removed.time)
            .meta("removedPrice", removed.price);
        if failed {
            entry = entry.meta("failed", true);
        }
        self.admin.record(entry).await;
    }

    /// Sleep until each scheduled time and run; returns once `shutdown` flips to true
    /// or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "🕒 Feed cleanup scheduled daily at {} ({:?}, mode {})",
            self.schedule.time.format("%H:%M"),
            self.schedule.zone,
            self.policy.as_str()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = Utc::now();
            let next = self.schedule.next_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next feed cleanup at {} (in {}s)", next, wait.as_secs());

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    // Failures are logged and audited; the schedule carries on
                    let _ = self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("🛑 Feed cleanup scheduler stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Resolve the configured time and zone, falling back to 03:00 / Local on bad input
pub fn schedule_from_config(time: &str, zone: &str) -> CleanupSchedule {
    let (hour, minute) = parse_cleanup_time(time).unwrap_or_else(|e| {
        warn!("⚠️  Invalid CLEANUP_TIME {:?} ({}), falling back to 03:00", time, e);
        (3, 0)
    });
    let zone = CleanupZone::parse(zone).unwrap_or_else(|e| {
        warn!("⚠️  Invalid CLEANUP_TIMEZONE {:?} ({}), falling back to Local", zone, e);
        CleanupZone::Local
    });
    CleanupSchedule::new(hour, minute, zone).unwrap_or_else(|_| CleanupSchedule {
        time: NaiveTime::from_hms_opt(3, 0, 0).unwrap_or(NaiveTime::MIN),
        zone,
    })
}

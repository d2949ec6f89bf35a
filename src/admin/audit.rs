//! Moderation / Audit Sink
//! Mission: Persist feedback reports and a bounded log of admin actions
//!
//! Keys:
//! - `admin:feedback:<id>` JSON feedback document
//! - `admin:feedback:index` sorted set of feedback ids scored by creation time
//! - `admin:logs` list of JSON log entries, newest first, capped at 500

use crate::admin::models::{AdminLogEntry, AdminLogKind, FeedbackMessage, ResolveAction};
use crate::feed::RemovalCounts;
use crate::store::{Command, KvStore, PipelineMode};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const FEEDBACK_KEY_PREFIX: &str = "admin:feedback:";
pub const FEEDBACK_INDEX_KEY: &str = "admin:feedback:index";
pub const ADMIN_LOGS_KEY: &str = "admin:logs";
pub const ADMIN_LOGS_MAX: i64 = 500;

/// How many of the newest feedback ids a listing looks at
const FEEDBACK_SCAN_WINDOW: i64 = 500;
const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("feedback not found")]
    NotFound,
    #[error("feedback already resolved")]
    AlreadyResolved,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn feedback_key(id: &str) -> String {
    format!("{FEEDBACK_KEY_PREFIX}{id}")
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct AdminStore {
    store: Arc<dyn KvStore>,
}

impl AdminStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Record a new report and note it in the admin log
    pub async fn add_feedback(
        &self,
        code: &str,
        reason: &str,
        reporter: &str,
    ) -> Result<FeedbackMessage> {
        let entry = FeedbackMessage {
            id: Uuid::new_v4().to_string(),
            code: code.to_string(),
            reason: reason.to_string(),
            reporter: reporter.to_string(),
            created_at: now_millis(),
            resolved: false,
            resolved_at: 0,
            resolved_by: None,
            action: None,
            removed_time: 0,
            removed_price: 0,
        };
        let value = serde_json::to_string(&entry).context("Failed to encode feedback")?;

        self.store
            .pipeline(
                vec![
                    Command::Set {
                        key: feedback_key(&entry.id),
                        value,
                        ttl: None,
                    },
                    Command::ZAdd {
                        key: FEEDBACK_INDEX_KEY.to_string(),
                        member: entry.id.clone(),
                        score: entry.created_at as f64,
                    },
                ],
                PipelineMode::Atomic,
            )
            .await
            .context("Failed to store feedback")?;

        self.record(
            AdminLogEntry::new(
                AdminLogKind::FeedbackSubmitted,
                format!("feedback submitted for code {code}"),
            )
            .actor(reporter)
            .timestamp(entry.created_at)
            .meta("feedbackId", &entry.id)
            .meta("code", code),
        )
        .await;

        Ok(entry)
    }

    pub async fn get_feedback(&self, id: &str) -> Result<Option<FeedbackMessage>> {
        let Some(raw) = self
            .store
            .get(&feedback_key(id))
            .await
            .context("Failed to load feedback")?
        else {
            return Ok(None);
        };
        let feedback = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt feedback record {id}"))?;
        Ok(Some(feedback))
    }

    /// Newest-first reports, skipping entries that are missing or unreadable
    pub async fn list_feedback(
        &self,
        limit: usize,
        include_resolved: bool,
    ) -> Result<Vec<FeedbackMessage>> {
        let limit = if limit == 0 { DEFAULT_LIST_LIMIT } else { limit };
        let ids = self
            .store
            .zrevrange(FEEDBACK_INDEX_KEY, 0, FEEDBACK_SCAN_WINDOW - 1)
            .await
            .context("Failed to read feedback index")?;

        let mut messages = Vec::with_capacity(limit.min(ids.len()));
        for id in &ids {
            let item = match self.get_feedback(id).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Skipping feedback {}: {:#}", id, e);
                    continue;
                }
            };
            if !include_resolved && item.resolved {
                continue;
            }
            messages.push(item);
            if messages.len() >= limit {
                break;
            }
        }
        Ok(messages)
    }

    /// Mark a report resolved; a report can only be resolved once
    pub async fn resolve_feedback(
        &self,
        id: &str,
        resolver: &str,
        action: ResolveAction,
        removed: RemovalCounts,
    ) -> Result<FeedbackMessage, FeedbackError> {
        let mut feedback = self.get_feedback(id).await?.ok_or(FeedbackError::NotFound)?;
        if feedback.resolved {
            return Err(FeedbackError::AlreadyResolved);
        }

        let now = now_millis();
        feedback.resolved = true;
        feedback.resolved_at = now;
        feedback.resolved_by = Some(resolver.to_string());
        feedback.action = Some(action);
        feedback.removed_time = removed.time;
        feedback.removed_price = removed.price;

        let value = serde_json::to_string(&feedback).context("Failed to encode feedback")?;
        self.store
            .set(&feedback_key(&feedback.id), value, None)
            .await
            .context("Failed to update feedback")?;

        let message = match action {
            ResolveAction::Delete => format!(
                "feedback {} resolved with delete on code {}",
                feedback.id, feedback.code
            ),
            ResolveAction::Keep => format!("feedback {} resolved by {}", feedback.id, resolver),
        };
        self.record(
            AdminLogEntry::new(AdminLogKind::FeedbackResolved, message)
                .actor(resolver)
                .timestamp(now)
                .meta("feedbackId", &feedback.id)
                .meta("code", &feedback.code)
                .meta("action", action.as_str())
                .meta("removedTime", removed.time)
                .meta("removedPrice", removed.price),
        )
        .await;

        Ok(feedback)
    }

    /// Push an entry and trim the log in one transaction
    ///
    /// Missing id, timestamp and actor default to a fresh uuid, now and `system`.
    pub async fn append_log(&self, mut entry: AdminLogEntry) -> Result<()> {
        if entry.id.trim().is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        if entry.timestamp <= 0 {
            entry.timestamp = now_millis();
        }
        if entry.actor.trim().is_empty() {
            entry.actor = "system".to_string();
        }
        let value = serde_json::to_string(&entry).context("Failed to encode log entry")?;

        self.store
            .pipeline(
                vec![
                    Command::LPush {
                        key: ADMIN_LOGS_KEY.to_string(),
                        value,
                    },
                    Command::LTrim {
                        key: ADMIN_LOGS_KEY.to_string(),
                        start: 0,
                        stop: ADMIN_LOGS_MAX - 1,
                    },
                ],
                PipelineMode::Atomic,
            )
            .await
            .context("Failed to append admin log")?;
        Ok(())
    }

    /// Append, downgrading failure to a warning
    pub async fn record(&self, entry: AdminLogEntry) {
        let kind = entry.kind;
        if let Err(e) = self.append_log(entry).await {
            warn!("⚠️  Admin log write failed ({:?}): {:#}", kind, e);
        }
    }

    /// Newest entries first, at most 500
    pub async fn list_logs(&self, limit: usize) -> Result<Vec<AdminLogEntry>> {
        let limit = match limit {
            0 => DEFAULT_LIST_LIMIT as i64,
            n => (n as i64).min(ADMIN_LOGS_MAX),
        };
        let raw = self
            .store
            .lrange(ADMIN_LOGS_KEY, 0, limit - 1)
            .await
            .context("Failed to read admin log")?;

        Ok(raw
            .iter()
            .filter_map(|v| serde_json::from_str(v).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    fn admin_store() -> (Arc<MemoryKvStore>, AdminStore) {
        let kv = Arc::new(MemoryKvStore::new());
        (kv.clone(), AdminStore::new(kv))
    }

    #[tokio::test]
    async fn test_add_feedback_indexes_and_logs() {
        let (_, admin) = admin_store();
        let feedback = admin.add_feedback("ABC123", "fake price", "guest").await.unwrap();
        assert!(!feedback.resolved);

        let loaded = admin.get_feedback(&feedback.id).await.unwrap().unwrap();
        assert_eq!(loaded, feedback);

        let logs = admin.list_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, AdminLogKind::FeedbackSubmitted);
        assert_eq!(logs[0].actor, "guest");
        assert_eq!(logs[0].metadata["code"], "ABC123");
    }

    #[tokio::test]
    async fn test_list_feedback_filters_resolved() {
        let (kv, admin) = admin_store();
        let first = admin.add_feedback("AAA", "one", "guest").await.unwrap();
        let second = admin.add_feedback("BBB", "two", "guest").await.unwrap();
        admin
            .resolve_feedback(&first.id, "root", ResolveAction::Keep, RemovalCounts::default())
            .await
            .unwrap();

        // A dangling index entry is skipped
        kv.zadd(FEEDBACK_INDEX_KEY, "missing".to_string(), f64::MAX)
            .await
            .unwrap();

        let all = admin.list_feedback(200, true).await.unwrap();
        assert_eq!(all.len(), 2);

        let open = admin.list_feedback(200, false).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second.id);

        let limited = admin.list_feedback(1, true).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_twice_rejected() {
        let (_, admin) = admin_store();
        let feedback = admin.add_feedback("CCC", "dup", "alice").await.unwrap();

        let resolved = admin
            .resolve_feedback(
                &feedback.id,
                "root",
                ResolveAction::Delete,
                RemovalCounts::new(2, 2),
            )
            .await
            .unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.action, Some(ResolveAction::Delete));
        assert_eq!(resolved.removed_time, 2);
        assert_eq!(resolved.resolved_by.as_deref(), Some("root"));

        assert!(matches!(
            admin
                .resolve_feedback(&feedback.id, "root", ResolveAction::Keep, RemovalCounts::default())
                .await,
            Err(FeedbackError::AlreadyResolved)
        ));
        assert!(matches!(
            admin
                .resolve_feedback("nope", "root", ResolveAction::Keep, RemovalCounts::default())
                .await,
            Err(FeedbackError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_log_defaults_and_cap() {
        let (_, admin) = admin_store();
        for i in 0..(ADMIN_LOGS_MAX + 5) {
            admin
                .append_log(AdminLogEntry::new(AdminLogKind::FeedCleanup, format!("run {i}")))
                .await
                .unwrap();
        }

        let logs = admin.list_logs(1000).await.unwrap();
        assert_eq!(logs.len(), ADMIN_LOGS_MAX as usize);
        assert_eq!(logs[0].message, format!("run {}", ADMIN_LOGS_MAX + 4));
        assert_eq!(logs[0].actor, "system");
        assert!(logs[0].timestamp > 0);
        assert!(!logs[0].id.is_empty());
    }
}

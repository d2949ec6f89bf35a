//! Moderation Models
//! Mission: Feedback reports and admin audit entries

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What happened, as recorded in the admin log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminLogKind {
    FeedbackSubmitted,
    FeedbackResolved,
    UserCreated,
    UserBanChanged,
    UserDeleted,
    PriceDeleted,
    FeedCleanup,
    #[serde(other)]
    Other,
}

/// One entry of the capped admin log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminLogEntry {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AdminLogKind,
    pub message: String,
    #[serde(default)]
    pub actor: String,
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl AdminLogEntry {
    /// Entry with id, actor and timestamp left for the store to fill in
    pub fn new(kind: AdminLogKind, message: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            kind,
            message: message.into(),
            actor: String::new(),
            timestamp: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn timestamp(mut self, millis: i64) -> Self {
        self.timestamp = millis;
        self
    }

    pub fn meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// How an admin settled a feedback report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveAction {
    Keep,
    Delete,
}

impl ResolveAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "keep" => Some(ResolveAction::Keep),
            "delete" => Some(ResolveAction::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveAction::Keep => "keep",
            ResolveAction::Delete => "delete",
        }
    }
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// A user report about a code in the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackMessage {
    pub id: String,
    pub code: String,
    pub reason: String,
    pub reporter: String,
    pub created_at: i64,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub resolved_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ResolveAction>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub removed_time: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub removed_price: i64,
}

/// Public feedback submission body
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveFeedbackRequest {
    #[serde(default)]
    pub action: String,
}

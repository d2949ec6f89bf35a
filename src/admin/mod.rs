//! Admin Module
//! Mission: Moderation feedback, the audit log and the admin HTTP surface

pub mod api;
pub mod audit;
pub mod models;

pub use audit::{AdminStore, FeedbackError};
pub use models::{AdminLogEntry, AdminLogKind, FeedbackMessage, ResolveAction};

//! HTTP API
//! Mission: Expose the feed, auth and moderation services over axum

pub mod error;
pub mod feed;
pub mod routes;

pub use error::ApiError;
pub use routes::{create_router, RouterConfig};

use crate::admin::AdminStore;
use crate::auth::AuthState;
use crate::feed::FeedStore;
use axum::extract::FromRef;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub feed: FeedStore,
    pub auth: AuthState,
    pub admin: Arc<AdminStore>,
}

impl AppState {
    pub fn new(feed: FeedStore, auth: AuthState, admin: Arc<AdminStore>) -> Self {
        Self { feed, auth, admin }
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

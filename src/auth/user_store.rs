//! User Storage
//! Mission: Store and manage user accounts in the key-value store
//!
//! Each account is a JSON document at `auth:user:<username>`; the set
//! `auth:users` indexes usernames for listing.

use crate::auth::models::User;
use crate::store::{Command, KvStore, PipelineMode};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const USER_KEY_PREFIX: &str = "auth:user:";
pub const USER_INDEX_KEY: &str = "auth:users";

const USER_SCAN_BATCH: usize = 200;

/// Account operation failures the API distinguishes
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("username already exists")]
    UsernameTaken,
    #[error("user not found")]
    NotFound,
    #[error("account banned")]
    Banned,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// User storage backed by a [`KvStore`]
pub struct UserStore {
    store: Arc<dyn KvStore>,
    hash_cost: u32,
}

fn user_key(username: &str) -> String {
    format!("{USER_KEY_PREFIX}{username}")
}

impl UserStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            hash_cost: DEFAULT_COST,
        }
    }

    /// Override the bcrypt work factor (tests use the minimum of 4)
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    async fn hash_password(&self, password: &str) -> Result<String> {
        let password = password.to_string();
        let cost = self.hash_cost;
        tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .context("Password hashing task failed")?
            .context("Failed to hash password")
    }

    async fn check_password(password: &str, password_hash: &str) -> Result<bool> {
        let password = password.to_string();
        let password_hash = password_hash.to_string();
        tokio::task::spawn_blocking(move || verify(password, &password_hash))
            .await
            .context("Password verification task failed")?
            .context("Failed to verify password")
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        let value = serde_json::to_string(user).context("Failed to encode user")?;
        self.store
            .pipeline(
                vec![
                    Command::Set {
                        key: user_key(&user.username),
                        value,
                        ttl: None,
                    },
                    Command::SAdd {
                        key: USER_INDEX_KEY.to_string(),
                        member: user.username.clone(),
                    },
                ],
                PipelineMode::Batched,
            )
            .await
            .context("Failed to save user")?;
        Ok(())
    }

    /// Register a regular (non-admin) account
    pub async fn register(&self, username: &str, password: &str) -> Result<User, AccountError> {
        self.create_user(username, password, false).await
    }

    /// Create a new user
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<User, AccountError> {
        let exists = self
            .store
            .exists(&user_key(username))
            .await
            .context("Failed to check username")?;
        if exists {
            return Err(AccountError::UsernameTaken);
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: self.hash_password(password).await?,
            is_admin,
            banned: false,
        };
        self.save_user(&user).await?;

        info!("👤 User created: {} (admin: {})", user.username, user.is_admin);
        Ok(user)
    }

    /// Get user by username, `None` when absent
    pub async fn find_user(&self, username: &str) -> Result<Option<User>> {
        let Some(raw) = self
            .store
            .get(&user_key(username))
            .await
            .context("Failed to load user")?
        else {
            return Ok(None);
        };
        let user = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt user record for {username}"))?;
        Ok(Some(user))
    }

    pub async fn get_user(&self, username: &str) -> Result<User, AccountError> {
        self.find_user(username).await?.ok_or(AccountError::NotFound)
    }

    /// Verify username and password, rejecting banned accounts
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, AccountError> {
        let user = self
            .find_user(username)
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        if !Self::check_password(password, &user.password_hash).await? {
            return Err(AccountError::InvalidCredentials);
        }
        if user.banned {
            return Err(AccountError::Banned);
        }
        Ok(user)
    }

    /// All readable accounts
    ///
    /// Uses the username index; when that set is empty (data written
    /// before the index existed) falls back to a keyspace scan.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let mut usernames = self
            .store
            .smembers(USER_INDEX_KEY)
            .await
            .context("Failed to read user index")?;

        if usernames.is_empty() {
            let pattern = format!("{USER_KEY_PREFIX}*");
            let mut cursor = 0;
            loop {
                let (next, keys) = self
                    .store
                    .scan_keys(cursor, &pattern, USER_SCAN_BATCH)
                    .await
                    .context("Failed to scan user keys")?;
                usernames.extend(
                    keys.iter()
                        .filter_map(|k| k.strip_prefix(USER_KEY_PREFIX))
                        .filter(|u| !u.is_empty())
                        .map(str::to_string),
                );
                cursor = next;
                if cursor == 0 {
                    break;
                }
            }
        }

        let mut users = Vec::with_capacity(usernames.len());
        for username in &usernames {
            match self.find_user(username).await {
                Ok(Some(user)) => users.push(user),
                Ok(None) => debug!("User index entry without record: {}", username),
                Err(e) => warn!("Skipping unreadable user {}: {:#}", username, e),
            }
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    pub async fn set_banned(&self, username: &str, banned: bool) -> Result<User, AccountError> {
        let mut user = self.get_user(username).await?;
        user.banned = banned;
        self.save_user(&user).await?;
        info!("🚫 User {} banned: {}", username, banned);
        Ok(user)
    }

    /// Remove the account and its index entry; deleting an absent user is a no-op
    pub async fn delete_user(&self, username: &str) -> Result<()> {
        self.store
            .del(&[&user_key(username)])
            .await
            .context("Failed to delete user")?;
        self.store
            .srem(USER_INDEX_KEY, username)
            .await
            .context("Failed to update user index")?;
        info!("🗑️  User deleted: {}", username);
        Ok(())
    }

    pub async fn is_banned(&self, username: &str) -> Result<bool, AccountError> {
        Ok(self.get_user(username).await?.banned)
    }

    /// Make sure the configured admin account exists with the given password
    ///
    /// An existing account is promoted and its password reset; otherwise
    /// a new admin is created. Empty credentials skip the step.
    pub async fn ensure_admin(&self, username: &str, password: &str) -> Result<Option<User>> {
        if username.is_empty() || password.is_empty() {
            warn!("⚠️  ADMIN_USERNAME/ADMIN_PASSWORD not set, skipping admin bootstrap");
            return Ok(None);
        }

        match self.find_user(username).await? {
            Some(mut user) => {
                user.is_admin = true;
                user.password_hash = self.hash_password(password).await?;
                self.save_user(&user).await?;
                info!("🔐 Admin account refreshed: {}", username);
                Ok(Some(user))
            }
            None => {
                let user = self
                    .create_user(username, password, true)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("Failed to create admin account")?;
                info!("🔐 Admin account created: {}", username);
                Ok(Some(user))
            }
        }
    }
}

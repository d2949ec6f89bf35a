//! Authentication Module
//! Mission: Accounts, captcha-gated login, JWT sessions and the admin gate

pub mod api;
pub mod captcha;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod user_store;

pub use api::AuthState;
pub use captcha::CaptchaStore;
pub use jwt::JwtHandler;
pub use middleware::{admin_middleware, auth_middleware};
pub use user_store::{AccountError, UserStore};

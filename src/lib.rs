//! Market Feed Backend Library
//!
//! Crowd-sourced price feed: two sorted-set indexes over a key-value store,
//! account and captcha handling, moderation tooling and a nightly cleanup job.
//! The binary in `main.rs` wires these together; tests drive them directly.

pub mod admin;
pub mod api;
pub mod auth;
pub mod config;
pub mod feed;
pub mod middleware;
pub mod scheduler;
pub mod store;

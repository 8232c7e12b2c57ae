//! SaaSPro gateway
//!
//! Subscription platform backend: accounts and sessions, plans and
//! subscriptions, 2FA, referrals, Telegram bridging and an OpenAI-compatible
//! AI gateway gated by API keys.

pub mod account;
pub mod ai;
pub mod api;
pub mod api_keys;
pub mod auth;
pub mod billing;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod mailer;
pub mod metrics;
pub mod notifications;
pub mod rate_limit;
pub mod referral;
pub mod server;
pub mod telegram;
pub mod twofa;

pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{ApiError, ApiResult};

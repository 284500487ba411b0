/// Clubhouse - membership organization backend
///
/// Member accounts with password plus emailed one-time-code login,
/// server-side sessions, admin moderation and a committee roster that is
/// snapshotted once per term.

pub mod account;
pub mod api;
pub mod audit;
pub mod auth;
pub mod captcha;
pub mod clock;
pub mod committee;
pub mod config;
pub mod context;
pub mod csrf;
pub mod db;
pub mod error;
pub mod jobs;
pub mod mailer;
pub mod metrics;
pub mod rate_limit;
pub mod server;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod watcher;

pub use context::AppContext;
pub use error::{AppError, AppResult};

//! TikTok credential lifecycle: the app-level token and per-user links.

pub mod manager;
pub mod model;
pub mod refresh;
pub mod user;

pub use manager::AppTokenManager;
pub use model::{AppTikTokToken, NewCredentials, RefreshResult, StatusReport};
pub use refresh::refresh_daemon;
pub use user::UserTokenManager;

// Admin API client - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod notify;
pub mod request;
pub mod retry;

pub use auth::{
    FileTokenStore, MemoryTokenStore, Navigator, PublicRoutes, SessionEvent, TokenStore,
};
pub use config::Config;
pub use error::{ApiError, RefreshError};
pub use http_client::{ApiClient, ApiClientBuilder, ApiResponse};
pub use notify::{Notice, Notifier};
pub use request::ApiRequest;

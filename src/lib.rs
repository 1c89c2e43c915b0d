//! Client-side authentication and session lifecycle for the Lumi dashboard.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use lumi_auth_client::{create_api_clients, ClientConfig, SessionController};
//!
//! let clients = create_api_clients(ClientConfig::for_address("http://localhost:8081")?)?;
//! let session = SessionController::new(clients.auth.clone());
//! session.mount().await?;
//! println!("{:?}", session.view());
//! # Ok(())
//! # }
//! ```

// Declare modules within this crate
pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod negotiator;
pub mod session;
mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

use std::sync::Arc;

// Re-export the main components for users of this crate
pub use auth::{AuthAction, AuthService, AuthStatus, RegisterRequest, SessionUser};
pub use client::HttpClient;
pub use config::{BuildMode, ClientConfig, ConfigError};
pub use errors::{ApiError, ApiResult, ClientBuildError, ErrorKind};
pub use negotiator::{ApiVersion, VersionNegotiator};
pub use session::{RouteAccess, SessionController, SessionView};
pub use transport::RequestOptions;

/// Clients sharing one HTTP client, and with it one cookie jar and one
/// negotiated base URL.
#[derive(Clone)]
pub struct ApiClients {
    pub http: Arc<HttpClient>,
    pub auth: AuthService,
}

pub fn create_api_clients(config: ClientConfig) -> Result<ApiClients, ClientBuildError> {
    let http = Arc::new(HttpClient::new(config)?);
    Ok(ApiClients {
        auth: AuthService::new(Arc::clone(&http)),
        http,
    })
}

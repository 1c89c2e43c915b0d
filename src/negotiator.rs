//! One-time API version negotiation.
//!
//! The first request made through a client asks the discovery endpoint which
//! API version to speak. Concurrent first requests share that single probe,
//! and its outcome is frozen for the lifetime of the client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::transport::Transport;

/// Upper bound for the discovery request.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(5);

/// API versions this client can speak.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    pub const fn number(self) -> u8 {
        match self {
            ApiVersion::V1 => 1,
            ApiVersion::V2 => 2,
        }
    }

    /// `{address}/api/v{n}`; `address` must be a base URL.
    pub fn base_url(self, address: &Url) -> Url {
        let mut url = address.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("api")
                .push(&format!("v{}", self.number()));
        }
        url
    }
}

impl TryFrom<u64> for ApiVersion {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ApiVersion::V1),
            2 => Ok(ApiVersion::V2),
            other => Err(other),
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    name: Option<String>,
    version: Value,
}

#[derive(Debug, Error)]
enum NegotiationError {
    #[error("discovery request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unsupported API version: {0}")]
    Unsupported(Value),
}

type PendingTransport = Shared<BoxFuture<'static, Arc<Transport>>>;

enum NegotiationState {
    Unresolved,
    Resolving(PendingTransport),
    Resolved(Arc<Transport>),
}

/// Everything the discovery probe needs, detached from the negotiator so the
/// in-flight future can be `'static`.
#[derive(Clone)]
struct Probe {
    http_client: reqwest::Client,
    address: Url,
    fallback_target: Url,
    timeout: Duration,
    enable_logging: bool,
}

impl Probe {
    async fn run(self) -> Arc<Transport> {
        let version = self.negotiate().await;
        let base_url = version.base_url(&self.address);
        debug!(%version, %base_url, "API base URL resolved");
        Arc::new(Transport::new(base_url, self.http_client, self.enable_logging))
    }

    async fn negotiate(&self) -> ApiVersion {
        match self.request_version().await {
            Ok(version) => version,
            Err(error) => {
                warn!(
                    target_url = %self.fallback_target,
                    error = %error,
                    "version negotiation failed, defaulting to v1"
                );
                ApiVersion::V1
            }
        }
    }

    async fn request_version(&self) -> Result<ApiVersion, NegotiationError> {
        let response = self
            .http_client
            .get(self.fallback_target.clone())
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let body: VersionResponse = response.json().await?;
        debug!(server = body.name.as_deref().unwrap_or("unknown"), version = %body.version, "discovery response");

        whole_number(&body.version)
            .and_then(|number| ApiVersion::try_from(number).ok())
            .ok_or(NegotiationError::Unsupported(body.version))
    }
}

/// `2` and `2.0` both count; fractions and strings do not.
fn whole_number(version: &Value) -> Option<u64> {
    version.as_u64().or_else(|| {
        version
            .as_f64()
            .filter(|number| number.fract() == 0.0 && *number >= 0.0 && *number <= u32::MAX as f64)
            .map(|number| number as u64)
    })
}

/// Resolves and caches the base URL of one client.
pub struct VersionNegotiator {
    state: Mutex<NegotiationState>,
    probe: Probe,
}

impl VersionNegotiator {
    pub(crate) fn new(
        http_client: reqwest::Client,
        address: Url,
        fallback_target: Url,
        enable_logging: bool,
    ) -> Self {
        Self {
            state: Mutex::new(NegotiationState::Unresolved),
            probe: Probe {
                http_client,
                address,
                fallback_target,
                timeout: NEGOTIATION_TIMEOUT,
                enable_logging,
            },
        }
    }

    /// Negotiator that starts resolved; no discovery request is ever sent.
    pub(crate) fn pinned(
        http_client: reqwest::Client,
        address: Url,
        version: ApiVersion,
        enable_logging: bool,
    ) -> Self {
        let transport = Transport::new(
            version.base_url(&address),
            http_client.clone(),
            enable_logging,
        );
        Self {
            state: Mutex::new(NegotiationState::Resolved(Arc::new(transport))),
            probe: Probe {
                http_client,
                fallback_target: address.clone(),
                address,
                timeout: NEGOTIATION_TIMEOUT,
                enable_logging,
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe.timeout = timeout;
        self
    }

    /// Transport bound to the negotiated base URL.
    pub(crate) async fn transport(&self) -> Arc<Transport> {
        let pending = {
            let mut state = self.state.lock();
            match &*state {
                NegotiationState::Resolved(transport) => return Arc::clone(transport),
                NegotiationState::Resolving(pending) => pending.clone(),
                NegotiationState::Unresolved => {
                    let pending = self.probe.clone().run().boxed().shared();
                    *state = NegotiationState::Resolving(pending.clone());
                    pending
                }
            }
        };

        let transport = pending.await;
        let mut state = self.state.lock();
        if matches!(*state, NegotiationState::Resolving(_)) {
            *state = NegotiationState::Resolved(Arc::clone(&transport));
        }
        transport
    }

    /// Negotiated base URL, resolving it first if needed.
    pub async fn base_url(&self) -> Url {
        self.transport().await.base_url().clone()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.state.lock(), NegotiationState::Resolved(_))
    }
}

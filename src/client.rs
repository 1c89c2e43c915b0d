use crate::config::ClientConfig;
use crate::errors::{ApiResult, ClientBuildError};
use crate::negotiator::VersionNegotiator;
use crate::transport::RequestOptions;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

/// Credentialed JSON client for the Lumi API.
///
/// Every call resolves to an [`ApiResult`]; transport and HTTP failures come
/// back as normalized [`crate::ApiError`] values. The first call negotiates
/// the API version, later calls reuse the negotiated base URL.
pub struct HttpClient {
    config: ClientConfig,
    negotiator: VersionNegotiator,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientBuildError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .cookie_store(config.with_credentials_enabled())
            .build()
            .map_err(ClientBuildError::HttpClientBuildFailed)?;

        let negotiator = match config.api_version() {
            Some(version) => VersionNegotiator::pinned(
                http_client,
                config.address().clone(),
                version,
                config.logging_enabled(),
            ),
            None => VersionNegotiator::new(
                http_client,
                config.address().clone(),
                config.fallback_target().clone(),
                config.logging_enabled(),
            ),
        };

        Ok(HttpClient { config, negotiator })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn negotiator(&self) -> &VersionNegotiator {
        &self.negotiator
    }

    /// Negotiated base URL; triggers negotiation on first use.
    pub async fn base_url(&self) -> Url {
        self.negotiator.base_url().await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: Option<RequestOptions>,
    ) -> ApiResult<T> {
        let transport = self.negotiator.transport().await;
        let builder = transport.apply_options(transport.request(Method::GET, endpoint), options);
        transport.send_request(&Method::GET, endpoint, builder).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        options: Option<RequestOptions>,
    ) -> ApiResult<T> {
        let transport = self.negotiator.transport().await;
        let builder = transport.request(Method::POST, endpoint).json(body);
        let builder = transport.apply_options(builder, options);
        transport.send_request(&Method::POST, endpoint, builder).await
    }
}

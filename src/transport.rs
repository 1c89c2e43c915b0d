use crate::errors::{normalize, ApiError, ApiResult, ErrorBody, TransportFailure};
use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Per-call overrides merged over the client defaults.
///
/// Options apply to a single request; the client's configuration is left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: reqwest::header::HeaderName, value: reqwest::header::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Reqwest client bound to a resolved base URL.
pub(crate) struct Transport {
    base_url: Url,
    http_client: reqwest::Client,
    enable_logging: bool,
}

impl Transport {
    pub(crate) fn new(base_url: Url, http_client: reqwest::Client, enable_logging: bool) -> Self {
        Transport {
            base_url,
            http_client,
            enable_logging,
        }
    }

    pub(crate) fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append `endpoint` to the base path, so `/login` under `/api/v2` lands
    /// on `/api/v2/login`.
    pub(crate) fn build_url(&self, endpoint: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(endpoint.split('/').filter(|segment| !segment.is_empty()));
        }
        url
    }

    pub(crate) fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.http_client.request(method, self.build_url(endpoint))
    }

    fn add_query_params(&self, builder: RequestBuilder, query: &[(String, String)]) -> RequestBuilder {
        if query.is_empty() {
            builder
        } else {
            builder.query(query)
        }
    }

    fn add_headers(&self, builder: RequestBuilder, headers: HeaderMap) -> RequestBuilder {
        if headers.is_empty() {
            builder
        } else {
            builder.headers(headers)
        }
    }

    pub(crate) fn apply_options(
        &self,
        builder: RequestBuilder,
        options: Option<RequestOptions>,
    ) -> RequestBuilder {
        let Some(options) = options else {
            return builder;
        };
        let builder = self.add_query_params(builder, &options.query);
        let builder = self.add_headers(builder, options.headers);
        match options.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    pub(crate) async fn send_request<T: DeserializeOwned>(
        &self,
        method: &Method,
        endpoint: &str,
        builder: RequestBuilder,
    ) -> ApiResult<T> {
        if self.enable_logging {
            debug!(%method, path = endpoint, "request started");
        }

        match self.execute::<T>(builder).await {
            Ok((status, body)) => {
                if self.enable_logging {
                    debug!(status, path = endpoint, "response received");
                }
                Ok(body)
            }
            Err(err) => {
                if self.enable_logging {
                    error!(
                        code = %err.code(),
                        message = err.message(),
                        details = ?err.details(),
                        "request failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<(u16, T), ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| normalize(TransportFailure::from(e)))?;

        let status = response.status();
        if status.is_success() {
            let body = self.handle_json_response::<T>(response).await?;
            Ok((status.as_u16(), body))
        } else {
            // Unreadable error bodies degrade to an empty `ErrorBody`.
            let error_body = match response.bytes().await {
                Ok(bytes) => ErrorBody::from_bytes(&bytes),
                Err(_) => ErrorBody::default(),
            };
            Err(normalize(TransportFailure::from_status(
                status.as_u16(),
                error_body,
            )))
        }
    }

    async fn handle_json_response<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| normalize(TransportFailure::from(e)))?;
        serde_json::from_slice(&bytes).map_err(|err| {
            normalize(TransportFailure::Response {
                status,
                body: ErrorBody::default(),
                message: format!("Could not deserialize response: {err}"),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, ACCEPT};

    fn transport(base: &str) -> Transport {
        Transport::new(Url::parse(base).expect("valid url"), reqwest::Client::new(), false)
    }

    #[test]
    fn appends_endpoints_to_base_path() {
        let transport = transport("http://localhost:8081/api/v2");
        assert_eq!(
            transport.build_url("/login").as_str(),
            "http://localhost:8081/api/v2/login"
        );
        assert_eq!(
            transport.build_url("auth/check").as_str(),
            "http://localhost:8081/api/v2/auth/check"
        );
    }

    #[test]
    fn trailing_slash_on_base_is_not_doubled() {
        let transport = transport("http://localhost:8081/api/v1/");
        assert_eq!(
            transport.build_url("/logout").as_str(),
            "http://localhost:8081/api/v1/logout"
        );
    }

    #[test]
    fn options_apply_to_one_request() {
        let transport = transport("http://localhost:8081/api/v1");
        let options = RequestOptions::default()
            .with_timeout(Duration::from_millis(250))
            .with_header(ACCEPT, HeaderValue::from_static("text/plain"))
            .with_query("page", "2");

        let request = transport
            .apply_options(transport.request(Method::GET, "/bots"), Some(options))
            .build()
            .expect("request builds");
        assert_eq!(request.url().as_str(), "http://localhost:8081/api/v1/bots?page=2");
        assert_eq!(request.timeout(), Some(&Duration::from_millis(250)));
        assert_eq!(request.headers().get(ACCEPT), Some(&HeaderValue::from_static("text/plain")));

        let plain = transport
            .apply_options(transport.request(Method::GET, "/bots"), None)
            .build()
            .expect("request builds");
        assert_eq!(plain.url().query(), None);
        assert_eq!(plain.timeout(), None);
    }
}

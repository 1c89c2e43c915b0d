use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

const NETWORK_ERROR_MESSAGE: &str = "Network error — check your connection";
const GENERIC_FAILURE_MESSAGE: &str = "Request failed";

/// Outcome of every request made through [`crate::HttpClient`].
pub type ApiResult<T> = Result<T, ApiError>;

/// Closed set of failure kinds a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NetworkError,
    Unauthorized,
    Forbidden,
    NotFound,
    ValidationError,
    ServerError,
    Unknown,
}

impl ErrorKind {
    /// Kind for a response that arrived with a non-success status.
    pub const fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::ValidationError,
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            500 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized request failure.
///
/// Values are only produced by [`normalize`], so every `ApiError` a caller
/// sees went through the same status table.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct ApiError {
    code: ErrorKind,
    message: String,
    details: Option<Value>,
    status: Option<u16>,
}

impl ApiError {
    pub fn code(&self) -> ErrorKind {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// HTTP status, absent for failures where no response arrived.
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

/// Error payload the backend sends alongside non-2xx statuses.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

impl ErrorBody {
    /// Lenient parse: bodies that are not the expected JSON shape yield an
    /// empty `ErrorBody` instead of failing.
    pub fn from_bytes(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// Raw transport outcome handed to [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFailure {
    /// Nothing came back: refused connection, timeout, DNS, TLS.
    NoResponse { message: String },
    /// A response arrived but could not be treated as success.
    Response {
        status: u16,
        body: ErrorBody,
        message: String,
    },
}

impl TransportFailure {
    pub(crate) fn from_status(status: u16, body: ErrorBody) -> Self {
        TransportFailure::Response {
            status,
            body,
            message: format!("Request failed with status code {status}"),
        }
    }
}

// Status responses never reach here: the transport splits them off before
// any reqwest error can carry one.
impl From<reqwest::Error> for TransportFailure {
    fn from(error: reqwest::Error) -> Self {
        TransportFailure::NoResponse {
            message: error.to_string(),
        }
    }
}

/// Map a transport outcome to exactly one [`ApiError`].
pub fn normalize(failure: TransportFailure) -> ApiError {
    match failure {
        TransportFailure::NoResponse { message } => ApiError {
            code: ErrorKind::NetworkError,
            message: NETWORK_ERROR_MESSAGE.to_owned(),
            details: Some(Value::String(message)),
            status: None,
        },
        TransportFailure::Response {
            status,
            body,
            message,
        } => {
            let message = body
                .error
                .filter(|error| !error.is_empty())
                .or_else(|| Some(message).filter(|message| !message.is_empty()))
                .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_owned());
            ApiError {
                code: ErrorKind::from_status(status),
                message,
                details: body.details,
                status: Some(status),
            }
        }
    }
}

/// Failure to set up an [`crate::HttpClient`].
#[derive(Error, Debug)]
pub enum ClientBuildError {
    #[error("Configuration Error: Failed to build HTTP client: {0}")]
    HttpClientBuildFailed(#[source] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn response(status: u16, body: ErrorBody) -> TransportFailure {
        TransportFailure::from_status(status, body)
    }

    #[rstest]
    #[case::bad_request(400, ErrorKind::ValidationError)]
    #[case::unauthorized(401, ErrorKind::Unauthorized)]
    #[case::forbidden(403, ErrorKind::Forbidden)]
    #[case::not_found(404, ErrorKind::NotFound)]
    #[case::server_error(500, ErrorKind::ServerError)]
    #[case::unmapped_5xx(599, ErrorKind::Unknown)]
    #[case::unmapped_4xx(409, ErrorKind::Unknown)]
    #[case::bad_gateway(502, ErrorKind::Unknown)]
    fn maps_statuses_to_error_kinds(#[case] status: u16, #[case] expected: ErrorKind) {
        let error = normalize(response(status, ErrorBody::default()));
        assert_eq!(error.code(), expected);
        assert_eq!(error.status(), Some(status));
    }

    #[rstest]
    #[case("connection refused")]
    #[case("operation timed out")]
    #[case("")]
    fn missing_response_is_always_a_network_error(#[case] message: &str) {
        let error = normalize(TransportFailure::NoResponse {
            message: message.to_owned(),
        });
        assert_eq!(error.code(), ErrorKind::NetworkError);
        assert_eq!(error.message(), NETWORK_ERROR_MESSAGE);
        assert_eq!(error.details(), Some(&json!(message)));
        assert_eq!(error.status(), None);
    }

    #[tokio::test]
    async fn refused_connection_maps_to_network_error() {
        let failure = reqwest::Client::new()
            .get("http://127.0.0.1:9/version")
            .send()
            .await
            .expect_err("nothing listens on the discard port");

        let error = normalize(TransportFailure::from(failure));

        assert_eq!(error.code(), ErrorKind::NetworkError);
        assert_eq!(error.status(), None);
    }

    #[test]
    fn prefers_body_error_message() {
        let body = ErrorBody::from_bytes(br#"{"error":"Invalid credentials","details":{"field":"password"}}"#);
        let error = normalize(response(401, body));
        assert_eq!(error.message(), "Invalid credentials");
        assert_eq!(error.details(), Some(&json!({"field": "password"})));
    }

    #[test]
    fn falls_back_to_transport_message_then_generic() {
        let error = normalize(response(404, ErrorBody::from_bytes(b"<html>nope</html>")));
        assert_eq!(error.message(), "Request failed with status code 404");
        assert_eq!(error.details(), None);

        let error = normalize(TransportFailure::Response {
            status: 500,
            body: ErrorBody {
                error: Some(String::new()),
                details: None,
            },
            message: String::new(),
        });
        assert_eq!(error.message(), GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn kinds_display_as_wire_codes() {
        assert_eq!(ErrorKind::ValidationError.to_string(), "VALIDATION_ERROR");
        assert_eq!(
            serde_json::to_value(ErrorKind::NetworkError).expect("serializes"),
            json!("NETWORK_ERROR")
        );
        let error = normalize(response(403, ErrorBody::default()));
        assert_eq!(error.to_string(), "FORBIDDEN: Request failed with status code 403");
    }
}

//! Authentication endpoints.
//!
//! Each operation has its own error policy: most report failures as-is,
//! `check_auth` treats a 401 as "not signed in".

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::HttpClient;
use crate::errors::{ApiError, ApiResult, ErrorKind};

/// Signed-in user as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: u64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub id: u64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: RegisteredUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub user: Option<SessionUser>,
}

impl AuthStatus {
    pub fn signed_out() -> Self {
        AuthStatus {
            authenticated: false,
            user: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Typed wrapper over the auth endpoints. Cheap to clone.
#[derive(Clone)]
pub struct AuthService {
    http: Arc<HttpClient>,
}

impl AuthService {
    pub fn new(http: Arc<HttpClient>) -> Self {
        AuthService { http }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub async fn register(&self, request: &RegisterRequest) -> ApiResult<RegisterResponse> {
        self.http.post("/register", request, None).await
    }

    pub async fn login(&self, email: &str, password: &str) -> ApiResult<SessionUser> {
        let request = LoginRequest {
            email: email.to_owned(),
            password: password.to_owned(),
        };
        self.http.post("/login", &request, None).await
    }

    pub async fn refresh(&self) -> ApiResult<TokenPair> {
        self.http.post("/refresh", &json!({}), None).await
    }

    /// Current session. A 401 means "signed out", not an error.
    pub async fn check_auth(&self) -> ApiResult<AuthStatus> {
        match self.http.get::<AuthStatus>("/auth/check", None).await {
            Ok(status) if status.authenticated => Ok(status),
            Ok(_) => Ok(AuthStatus::signed_out()),
            Err(err) if err.code() == ErrorKind::Unauthorized => Ok(AuthStatus::signed_out()),
            Err(err) => Err(err),
        }
    }

    /// End the server session. Safe to call when already signed out.
    pub async fn logout(&self) -> ApiResult<LogoutResponse> {
        self.http.post("/logout", &json!({}), None).await
    }

    pub async fn is_authenticated(&self) -> bool {
        matches!(
            self.check_auth().await,
            Ok(AuthStatus {
                authenticated: true,
                ..
            })
        )
    }
}

/// Form an error message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    Login,
    Register,
}

/// Inline message shown next to a failed login or registration form.
pub fn user_message(action: AuthAction, error: &ApiError) -> String {
    let fixed = match (action, error.code()) {
        (_, ErrorKind::NetworkError) => Some("Cannot connect to server"),
        (AuthAction::Login, ErrorKind::Unauthorized) => Some("Invalid email or password"),
        (AuthAction::Login, ErrorKind::ValidationError) => Some("Please check your input"),
        (AuthAction::Register, ErrorKind::ValidationError) => Some("Please check your input fields"),
        // The backend reports duplicate email/username as a 500.
        (AuthAction::Register, ErrorKind::ServerError) => Some("Email or username already taken"),
        _ => None,
    };
    fixed.map_or_else(|| error.message().to_owned(), str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{normalize, ErrorBody, TransportFailure};
    use crate::test_support::FakeBackend;
    use rstest::rstest;

    fn service(backend: &FakeBackend) -> AuthService {
        AuthService::new(Arc::new(
            HttpClient::new(backend.config()).expect("client builds"),
        ))
    }

    fn registration() -> RegisterRequest {
        RegisterRequest {
            first_name: "Ada".to_owned(),
            last_name: "Lovelace".to_owned(),
            username: "ada".to_owned(),
            email: "ada@lumi.test".to_owned(),
            password: "analytical".to_owned(),
        }
    }

    fn api_error(status: u16, message: &str) -> ApiError {
        normalize(TransportFailure::from_status(
            status,
            ErrorBody {
                error: Some(message.to_owned()),
                details: None,
            },
        ))
    }

    #[test]
    fn session_user_uses_camel_case_on_the_wire() {
        let user: SessionUser = serde_json::from_value(json!({
            "id": 7,
            "email": "ada@lumi.test",
            "username": "ada",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "role": 1,
            "sessionId": "ignored"
        }))
        .expect("decodes");
        assert_eq!(user.first_name, "Ada");
        assert_eq!(user.role, 1);
    }

    #[tokio::test]
    async fn register_then_login_round_trips_identity() {
        let backend = FakeBackend::start().await;
        let auth = service(&backend);
        let request = registration();

        let registered = auth.register(&request).await.expect("registration succeeds");
        assert_eq!(registered.user.email, request.email);

        let user = auth
            .login(&request.email, &request.password)
            .await
            .expect("login succeeds");
        assert_eq!(user.email, request.email);
        assert_eq!(user.username, request.username);
        assert_eq!(user.first_name, request.first_name);
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_server_error() {
        let backend = FakeBackend::start().await;
        let auth = service(&backend);
        auth.register(&registration()).await.expect("first registration");

        let error = auth
            .register(&registration())
            .await
            .expect_err("duplicate email");

        assert_eq!(error.code(), ErrorKind::ServerError);
        assert_eq!(user_message(AuthAction::Register, &error), "Email or username already taken");
    }

    #[tokio::test]
    async fn incomplete_registration_is_a_validation_error() {
        let backend = FakeBackend::start().await;
        let auth = service(&backend);
        let request = RegisterRequest {
            email: String::new(),
            ..registration()
        };

        let error = auth.register(&request).await.expect_err("email required");

        assert_eq!(error.code(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let backend = FakeBackend::start().await;
        let auth = service(&backend);

        let error = auth
            .login("a@b.com", "wrong")
            .await
            .expect_err("bad credentials");

        assert_eq!(error.code(), ErrorKind::Unauthorized);
        assert_eq!(error.message(), "Invalid credentials");
        assert_eq!(error.status(), Some(401));
    }

    #[tokio::test]
    async fn check_auth_absorbs_unauthorized() {
        let backend = FakeBackend::start().await;
        backend.set_check_requires_session(true);
        let auth = service(&backend);

        let status = auth.check_auth().await.expect("401 is not an error here");

        assert_eq!(status, AuthStatus::signed_out());
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn check_auth_reports_session_after_login() {
        let backend = FakeBackend::start().await;
        let auth = service(&backend);
        auth.register(&registration()).await.expect("registration");
        auth.login("ada@lumi.test", "analytical").await.expect("login");

        let status = auth.check_auth().await.expect("check succeeds");

        assert!(status.authenticated);
        assert_eq!(status.user.map(|user| user.username), Some("ada".to_owned()));
        assert!(auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn check_auth_surfaces_other_failures() {
        let backend = FakeBackend::start().await;
        backend.set_check_status(Some(403));
        let auth = service(&backend);

        let error = auth.check_auth().await.expect_err("403 is reported");

        assert_eq!(error.code(), ErrorKind::Forbidden);
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn repeated_logout_is_harmless() {
        let backend = FakeBackend::start().await;
        let auth = service(&backend);
        auth.register(&registration()).await.expect("registration");
        auth.login("ada@lumi.test", "analytical").await.expect("login");

        auth.logout().await.expect("first logout ends the session");
        let second = auth.logout().await;

        assert!(second.is_ok());
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn refresh_requires_a_session() {
        let backend = FakeBackend::start().await;
        let auth = service(&backend);

        let error = auth.refresh().await.expect_err("no session yet");
        assert_eq!(error.code(), ErrorKind::Unauthorized);

        auth.register(&registration()).await.expect("registration");
        auth.login("ada@lumi.test", "analytical").await.expect("login");
        let tokens = auth.refresh().await.expect("session refreshes");
        assert!(!tokens.access_token.is_empty());
        assert_ne!(tokens.access_token, tokens.refresh_token);
    }

    #[rstest]
    #[case::login_unauthorized(AuthAction::Login, api_error(401, "Invalid credentials"), "Invalid email or password")]
    #[case::login_validation(AuthAction::Login, api_error(400, "email missing"), "Please check your input")]
    #[case::login_other(AuthAction::Login, api_error(403, "Account locked"), "Account locked")]
    #[case::register_validation(AuthAction::Register, api_error(400, "bad"), "Please check your input fields")]
    #[case::register_duplicate(AuthAction::Register, api_error(500, "duplicate key"), "Email or username already taken")]
    #[case::register_other(AuthAction::Register, api_error(404, "Gone"), "Gone")]
    #[case::network(
        AuthAction::Register,
        normalize(TransportFailure::NoResponse { message: "refused".to_owned() }),
        "Cannot connect to server"
    )]
    fn maps_errors_to_form_messages(
        #[case] action: AuthAction,
        #[case] error: ApiError,
        #[case] expected: &str,
    ) {
        assert_eq!(user_message(action, &error), expected);
    }
}

//! Session view state machine.
//!
//! ```text
//! Checking ──mount/logout──▶ Unauthenticated ──login──▶ Authenticated(user)
//!     └──────────────mount/login──────────────────────▶ Authenticated(user)
//!                            Unauthenticated ◀──logout── Authenticated(user)
//! ```
//!
//! Login and logout supersede a pending mount check.
//!
//! The view is published on a `watch` channel so any number of consumers can
//! follow it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::{AuthService, AuthStatus, RegisterRequest, SessionUser};
use crate::errors::{ApiResult, ErrorKind};

/// What the UI should render for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionView {
    Checking,
    Unauthenticated,
    Authenticated(SessionUser),
}

/// Outcome of guarding a route on the current view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess<'a> {
    /// Still checking; render a placeholder.
    Pending,
    RequiresLogin,
    Forbidden,
    Granted(&'a SessionUser),
}

impl SessionView {
    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            SessionView::Authenticated(user) => Some(user),
            SessionView::Checking | SessionView::Unauthenticated => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionView::Authenticated(_))
    }

    /// Guard a route, optionally requiring an exact role.
    pub fn access(&self, required_role: Option<u32>) -> RouteAccess<'_> {
        match (self, required_role) {
            (SessionView::Checking, _) => RouteAccess::Pending,
            (SessionView::Unauthenticated, _) => RouteAccess::RequiresLogin,
            (SessionView::Authenticated(user), Some(role)) if user.role != role => {
                RouteAccess::Forbidden
            }
            (SessionView::Authenticated(user), _) => RouteAccess::Granted(user),
        }
    }
}

struct Inner {
    auth: AuthService,
    view: watch::Sender<SessionView>,
    // Bumped on mount, unmount, login and logout; check results carry the
    // value they started with and are dropped when it moved on.
    generation: AtomicU64,
}

impl Inner {
    fn settle_check(&self, generation: u64, outcome: ApiResult<AuthStatus>) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("discarding auth check result after unmount");
            return;
        }
        let next = match outcome {
            Ok(AuthStatus {
                authenticated: true,
                user: Some(user),
            }) => SessionView::Authenticated(user),
            Ok(_) => SessionView::Unauthenticated,
            Err(err) => {
                if err.code() != ErrorKind::Unauthorized {
                    warn!(code = %err.code(), message = err.message(), "auth check failed");
                }
                SessionView::Unauthenticated
            }
        };
        self.view.send_if_modified(|view| {
            if *view == SessionView::Checking {
                *view = next;
                true
            } else {
                false
            }
        });
    }

    fn supersede_checks(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn set_view(&self, next: SessionView) {
        self.view.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }
}

/// Drives [`SessionView`] from [`AuthService`] calls.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(auth: AuthService) -> Self {
        let (view, _) = watch::channel(SessionView::Checking);
        SessionController {
            inner: Arc::new(Inner {
                auth,
                view,
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn view(&self) -> SessionView {
        self.inner.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.inner.view.subscribe()
    }

    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    /// Start the initial auth check. The view leaves `Checking` once it
    /// settles, unless [`unmount`](Self::unmount) ran first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(&self) -> JoinHandle<()> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner.auth.check_auth().await;
            inner.settle_check(generation, outcome);
        })
    }

    /// Stop applying results of checks started before this call. In-flight
    /// requests still run to completion.
    pub fn unmount(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Sign in. A pending auth check is superseded: it was sent before the
    /// session cookie existed.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<SessionUser> {
        let user = self.inner.auth.login(email, password).await?;
        self.inner.supersede_checks();
        self.inner.set_view(SessionView::Authenticated(user.clone()));
        Ok(user)
    }

    /// Register, then sign in with the same credentials.
    pub async fn register_and_login(&self, request: &RegisterRequest) -> ApiResult<SessionUser> {
        self.inner.auth.register(request).await?;
        self.login(&request.email, &request.password).await
    }

    /// Sign out. The view flips before the server is contacted, and any
    /// pending auth check is dropped; server failures are logged and ignored.
    pub async fn logout(&self) {
        self.inner.supersede_checks();
        self.inner.set_view(SessionView::Unauthenticated);
        if let Err(err) = self.inner.auth.logout().await {
            warn!(code = %err.code(), message = err.message(), "logout error ignored");
        }
    }
}

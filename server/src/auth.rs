//! Admin capability check.
//!
//! Administrators authenticate with `Authorization: Bearer <token>`. Two
//! kinds of token are accepted: a static token configured at startup, and
//! session tokens issued by `POST /api/auth/login` against the configured
//! admin credentials. Secrets are kept only as SHA-256 digests and compared
//! digest to digest.

use crate::AppState;
use crate::error::ApiError;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// How long a login session token stays valid.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

type Digest32 = [u8; 32];

fn digest(secret: &str) -> Digest32 {
    Sha256::digest(secret.as_bytes()).into()
}

fn digests_equal(a: &Digest32, b: &Digest32) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// A static secret administrators may present directly.
pub struct AdminToken {
    digest: Digest32,
}

impl AdminToken {
    /// Wraps a configured token. Returns `None` for a blank token.
    #[must_use]
    pub fn new(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        Some(Self {
            digest: digest(token),
        })
    }

    /// Returns true if `presented` is the configured token.
    #[must_use]
    pub fn verify(&self, presented: &str) -> bool {
        digests_equal(&self.digest, &digest(presented))
    }
}

/// The username and password accepted by the login endpoint.
pub struct AdminCredentials {
    username: String,
    password_digest: Digest32,
}

impl AdminCredentials {
    /// Returns `None` if either part is blank.
    #[must_use]
    pub fn new(username: &str, password: &str) -> Option<Self> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password_digest: digest(password),
        })
    }

    /// Returns true if both parts match.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let password_ok = digests_equal(&self.password_digest, &digest(password));
        username == self.username && password_ok
    }
}

/// Everything that can grant admin access.
pub struct AdminAuth {
    token: Option<AdminToken>,
    credentials: Option<AdminCredentials>,
    sessions: RwLock<HashMap<Digest32, Instant>>,
}

impl AdminAuth {
    /// No token, no credentials: every admin request is refused.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: None,
            credentials: None,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: AdminToken) -> Self {
        self.token = Some(token);
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: AdminCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Returns true if at least one way of authenticating is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.token.is_some() || self.credentials.is_some()
    }

    /// Checks credentials and, on success, issues a fresh session token.
    pub fn login(&self, username: &str, password: &str) -> Option<String> {
        let credentials = self.credentials.as_ref()?;
        if !credentials.verify(username, password) {
            warn!(%username, "rejected admin login");
            return None;
        }

        let token = format!("bst_{}", Uuid::new_v4().simple());
        let now = Instant::now();
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.retain(|_, issued| now.duration_since(*issued) < SESSION_TTL);
        sessions.insert(digest(&token), now);
        info!(%username, "admin logged in");
        Some(token)
    }

    /// Returns true if `presented` is the static token or a live session token.
    #[must_use]
    pub fn authorize(&self, presented: &str) -> bool {
        if self.token.as_ref().is_some_and(|t| t.verify(presented)) {
            return true;
        }
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions
            .get(&digest(presented))
            .is_some_and(|issued| issued.elapsed() < SESSION_TTL)
    }
}

impl Default for AdminAuth {
    fn default() -> Self {
        Self::new()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Proof that the request carried an admin token.
///
/// Add it as a handler argument to require administrator access.
#[derive(Debug, Clone, Copy)]
pub struct Admin;

impl FromRequestParts<AppState> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer_token(&parts.headers) {
            Some(token) if state.auth.authorize(token) => Ok(Admin),
            Some(_) => {
                warn!(path = %parts.uri.path(), "rejected admin request with wrong token");
                Err(ApiError::Unauthorized)
            }
            None => Err(ApiError::Unauthorized),
        }
    }
}

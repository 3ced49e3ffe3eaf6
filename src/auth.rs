//! OAuth2-style auth extension: token acquisition, transparent refresh,
//! and a single bounded retry on credential rejection.

use crate::client::{classify_response, ApiClient, Request};
use crate::{Error, Result};
use serde_json::Value;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tokens are treated as expired this long before their actual expiry so
/// a request never departs with a token about to lapse mid-flight.
pub const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// How a token is obtained. Chosen automatically from the credentials at
/// hand; a usable refresh token always takes priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    ClientCredentials,
    Password,
    RefreshToken,
}

impl GrantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::ClientCredentials => "client_credentials",
            GrantKind::Password => "password",
            GrantKind::RefreshToken => "refresh_token",
        }
    }
}

/// Credentials handed to the token endpoint.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn client(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client_id: id.into(),
            client_secret: secret.into(),
            ..Self::default()
        }
    }

    pub fn with_password(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }
}

/// Observable token lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    NoToken,
    Valid,
    ExpiringSoon,
    Expired,
}

#[derive(Debug, Clone)]
struct TokenState {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Instant,
}

impl TokenState {
    fn status(&self) -> TokenStatus {
        let now = Instant::now();
        if now >= self.expires_at {
            TokenStatus::Expired
        } else if now + TOKEN_EXPIRY_MARGIN >= self.expires_at {
            TokenStatus::ExpiringSoon
        } else {
            TokenStatus::Valid
        }
    }
}

/// Decorates an [`ApiClient`] with token management.
///
/// [`execute`](Self::execute) ensures a live token before delegating and,
/// if the delegated call still comes back with [`Error::Auth`], performs
/// exactly one forced re-acquisition followed by exactly one retry of the
/// original request. Concurrent token refreshes coalesce into a single
/// in-flight acquisition.
pub struct AuthClient {
    inner: ApiClient,
    token_url: String,
    credentials: Credentials,
    token: RwLock<Option<TokenState>>,
    // Serializes acquisition so concurrent ensure_token calls coalesce.
    acquire_lock: tokio::sync::Mutex<()>,
}

impl AuthClient {
    pub fn new(inner: ApiClient, token_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            inner,
            token_url: token_url.into(),
            credentials,
            token: RwLock::new(None),
            acquire_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The wrapped client. Calls made directly on it bypass token
    /// management but still see the `Authorization` default header from
    /// the last successful acquisition.
    pub fn client(&self) -> &ApiClient {
        &self.inner
    }

    /// Current access token, if one has been acquired.
    pub fn access_token(&self) -> Option<String> {
        self.token
            .read()
            .expect("token lock poisoned")
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    pub fn token_status(&self) -> TokenStatus {
        self.token
            .read()
            .expect("token lock poisoned")
            .as_ref()
            .map(TokenState::status)
            .unwrap_or(TokenStatus::NoToken)
    }

    /// Execute a request with a guaranteed-fresh token, retrying exactly
    /// once after a forced re-acquisition if the server still rejects the
    /// credentials.
    ///
    /// Metrics see one record for the whole call, not one per attempt.
    pub async fn execute(&self, req: &Request) -> Result<Value> {
        let started = Instant::now();
        let result = self.execute_with_reauth(req).await;
        self.inner
            .record_call(&req.path, req.method.as_str(), started, &result);
        result
    }

    async fn execute_with_reauth(&self, req: &Request) -> Result<Value> {
        self.ensure_token().await?;
        match self.inner.execute_inner(req).await {
            Err(Error::Auth { message, .. }) => {
                warn!(%message, "request rejected despite fresh token, re-acquiring once");
                self.force_reacquire().await?;
                self.inner.execute_inner(req).await
            }
            other => other,
        }
    }

    pub async fn get(&self, endpoint: &str, params: Option<Value>) -> Result<Value> {
        let mut req = Request::get(endpoint);
        req.params = params;
        self.execute(&req).await
    }

    pub async fn post(&self, endpoint: &str, body: Option<Value>) -> Result<Value> {
        let mut req = Request::post(endpoint);
        req.body = body;
        self.execute(&req).await
    }

    pub async fn put(&self, endpoint: &str, body: Option<Value>) -> Result<Value> {
        let mut req = Request::put(endpoint);
        req.body = body;
        self.execute(&req).await
    }

    pub async fn delete(&self, endpoint: &str, params: Option<Value>) -> Result<Value> {
        let mut req = Request::delete(endpoint);
        req.params = params;
        self.execute(&req).await
    }

    /// Make sure a usable token is present: acquire when there is none,
    /// refresh when inside the expiry margin, and fall back to a full
    /// re-acquisition when the refresh itself is rejected. Callers racing
    /// here coalesce on one in-flight acquisition; a caller holding a
    /// valid token performs zero network calls.
    pub async fn ensure_token(&self) -> Result<()> {
        if self.token_status() == TokenStatus::Valid {
            return Ok(());
        }

        let _guard = self.acquire_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if self.token_status() == TokenStatus::Valid {
            debug!("token refreshed by concurrent caller, nothing to do");
            return Ok(());
        }

        let has_refresh = self.refresh_token().is_some();
        match self.acquire_locked(true).await {
            Ok(()) => Ok(()),
            Err(Error::Auth { message, .. }) if has_refresh => {
                // Refresh grant rejected; never leave the client
                // unauthenticated without trying a full re-acquisition.
                warn!(%message, "token refresh failed, falling back to full acquisition");
                self.acquire_locked(false).await
            }
            Err(e) => Err(e),
        }
    }

    /// Acquire a token immediately, bypassing any cached state.
    /// Grant kind is selected from the available credentials.
    pub async fn acquire_token(&self) -> Result<()> {
        let _guard = self.acquire_lock.lock().await;
        self.acquire_locked(true).await
    }

    async fn force_reacquire(&self) -> Result<()> {
        let _guard = self.acquire_lock.lock().await;
        match self.acquire_locked(true).await {
            Err(Error::Auth { .. }) if self.refresh_token().is_some() => {
                self.acquire_locked(false).await
            }
            other => other,
        }
    }

    fn refresh_token(&self) -> Option<String> {
        self.token
            .read()
            .expect("token lock poisoned")
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .or_else(|| self.credentials.refresh_token.clone())
    }

    /// Acquisition body: caller must hold `acquire_lock`.
    async fn acquire_locked(&self, allow_refresh: bool) -> Result<()> {
        let refresh = if allow_refresh { self.refresh_token() } else { None };
        let (grant, mut form): (GrantKind, Vec<(&str, String)>) = match (
            refresh,
            &self.credentials.username,
            &self.credentials.password,
        ) {
            (Some(token), _, _) => (
                GrantKind::RefreshToken,
                vec![("refresh_token", token)],
            ),
            (None, Some(user), Some(pass)) => (
                GrantKind::Password,
                vec![("username", user.clone()), ("password", pass.clone())],
            ),
            _ => (GrantKind::ClientCredentials, Vec::new()),
        };
        form.push(("grant_type", grant.as_str().to_string()));
        form.push(("client_id", self.credentials.client_id.clone()));
        form.push(("client_secret", self.credentials.client_secret.clone()));
        if let Some(scope) = &self.credentials.scope {
            form.push(("scope", scope.clone()));
        }

        // Talks to the token endpoint directly; routing through execute()
        // would recurse into ensure_token.
        let client = self.inner.session()?;
        let response = client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::auth(format!("token endpoint unreachable: {e}")))?;

        let body = match classify_response(response).await {
            Ok(body) => body,
            Err(e) => {
                let message = token_error_message(&e);
                return Err(Error::Auth {
                    message: format!("token acquisition failed: {message}"),
                    status: e.status(),
                    body: e.body().cloned(),
                });
            }
        };

        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::auth("token endpoint response is missing access_token"))?
            .to_string();
        let refresh_token = body
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.refresh_token());
        let expires_in = body
            .get("expires_in")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        self.inner
            .set_default_header("Authorization", format!("Bearer {access_token}"));
        *self.token.write().expect("token lock poisoned") = Some(TokenState {
            access_token,
            refresh_token,
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });

        info!(grant = grant.as_str(), expires_in, "OAuth2 token acquired");
        Ok(())
    }
}

fn token_error_message(err: &Error) -> String {
    err.body()
        .and_then(|body| {
            body.get("error_description")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_kind_names_match_oauth2() {
        assert_eq!(GrantKind::ClientCredentials.as_str(), "client_credentials");
        assert_eq!(GrantKind::Password.as_str(), "password");
        assert_eq!(GrantKind::RefreshToken.as_str(), "refresh_token");
    }

    #[test]
    fn token_state_reports_margin() {
        let valid = TokenState {
            access_token: "t".into(),
            refresh_token: None,
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        assert_eq!(valid.status(), TokenStatus::Valid);

        let expiring = TokenState {
            expires_at: Instant::now() + Duration::from_secs(10),
            ..valid.clone()
        };
        assert_eq!(expiring.status(), TokenStatus::ExpiringSoon);

        let expired = TokenState {
            expires_at: Instant::now() - Duration::from_secs(1),
            ..valid
        };
        assert_eq!(expired.status(), TokenStatus::Expired);
    }
}

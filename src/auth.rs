//! Token lifecycle management for the Kraken API
//!
//! An [`AuthSession`] owns exactly one [`Credential`] and replaces it
//! wholesale on every login, so callers never observe a half-updated
//! token. The session lock is held across the login call, which makes
//! concurrent `ensure_valid` callers share a single refresh instead of
//! each triggering their own.

use crate::config::AuthConfig;
use crate::error::{Result, TakodenError};
use crate::kraken::KrakenTransport;
use crate::logging::get_logger;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A bearer credential with its validity window
#[derive(Debug, Clone)]
pub struct Credential {
    /// Opaque JWT for the authorization header
    pub token: String,

    /// When the token was issued
    pub issued_at: DateTime<Utc>,

    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential valid for `lifetime` starting at `issued_at`
    pub fn new(token: String, issued_at: DateTime<Utc>, lifetime: Duration) -> Result<Self> {
        if lifetime <= Duration::zero() {
            return Err(TakodenError::validation(
                "token_lifetime",
                "Token lifetime must be positive",
            ));
        }
        Ok(Self {
            token,
            issued_at,
            expires_at: issued_at + lifetime,
        })
    }

    /// Whether the credential still has more than `margin` of life left
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now < self.expires_at - margin
    }
}

/// Authentication session wrapping the API transport
///
/// All authenticated calls go through [`AuthSession::request`], which
/// applies the proactive refresh margin before the call and a single
/// reactive re-login when the API reports an expired token.
pub struct AuthSession {
    transport: Arc<dyn KrakenTransport>,
    email: String,
    password: String,
    refresh_margin: Duration,
    token_lifetime: Duration,
    state: Mutex<Option<Credential>>,
    logger: crate::logging::StructuredLogger,
}

impl AuthSession {
    /// Create a session over the given transport
    pub fn new(
        transport: Arc<dyn KrakenTransport>,
        email: String,
        password: String,
        cfg: &AuthConfig,
    ) -> Self {
        Self {
            transport,
            email,
            password,
            refresh_margin: Duration::minutes(cfg.refresh_margin_minutes as i64),
            token_lifetime: Duration::minutes(cfg.token_lifetime_minutes as i64),
            state: Mutex::new(None),
            logger: get_logger("auth"),
        }
    }

    /// Return a credential guaranteed to outlive the refresh margin
    ///
    /// Holds the session lock across the login so that concurrent callers
    /// observe the one replaced credential rather than racing logins.
    pub async fn ensure_valid(&self) -> Result<Credential> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Some(cred) = state.as_ref() {
            if cred.is_fresh(now, self.refresh_margin) {
                return Ok(cred.clone());
            }
            self.logger.debug(&format!(
                "token within refresh margin (expires {}), refreshing",
                cred.expires_at
            ));
        }

        let cred = self.login(now).await?;
        *state = Some(cred.clone());
        Ok(cred)
    }

    /// Execute an authenticated GraphQL document
    ///
    /// On a token-expiry error the session performs exactly one forced
    /// re-login and re-issues the request once. A second consecutive auth
    /// failure is fatal for the cycle.
    pub async fn request(&self, document: &str, variables: Value) -> Result<Value> {
        let cred = self.ensure_valid().await?;

        match self
            .transport
            .query(&cred.token, document, variables.clone())
            .await
        {
            Ok(data) => Ok(data),
            Err(e) if e.is_auth() => {
                self.logger
                    .info("API reported an expired token, forcing re-login");
                let cred = self.relogin_unless_replaced(&cred.token).await?;
                self.transport
                    .query(&cred.token, document, variables)
                    .await
                    .map_err(|retry_err| {
                        if retry_err.is_auth() {
                            TakodenError::auth(format!(
                                "request still unauthorized after re-login: {}",
                                retry_err
                            ))
                        } else {
                            retry_err
                        }
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// Re-login unless another caller already replaced the failed token
    async fn relogin_unless_replaced(&self, failed_token: &str) -> Result<Credential> {
        let mut state = self.state.lock().await;
        if let Some(cred) = state.as_ref() {
            if cred.token != failed_token {
                return Ok(cred.clone());
            }
        }
        let cred = self.login(Utc::now()).await?;
        *state = Some(cred.clone());
        Ok(cred)
    }

    /// Perform a login; caller must hold the session lock
    async fn login(&self, now: DateTime<Utc>) -> Result<Credential> {
        match self.transport.obtain_token(&self.email, &self.password).await {
            Ok(grant) => {
                let cred = Credential::new(grant.token, now, self.token_lifetime)?;
                self.logger.info(&format!(
                    "login succeeded, token valid until {}",
                    cred.expires_at
                ));
                Ok(cred)
            }
            Err(e) => {
                self.logger.error(&format!("login failed: {}", e));
                Err(if e.is_auth() {
                    e
                } else {
                    TakodenError::auth(format!("login failed: {}", e))
                })
            }
        }
    }
}

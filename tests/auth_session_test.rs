use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use takoden::auth::AuthSession;
use takoden::config::AuthConfig;
use takoden::error::{Result, TakodenError};
use takoden::kraken::{KrakenTransport, TokenGrant};

/// Transport that counts logins and queries and can fail queries with an
/// auth error a configurable number of times.
struct CountingTransport {
    logins: AtomicUsize,
    queries: AtomicUsize,
    auth_failures_remaining: AtomicUsize,
    login_delay_ms: u64,
}

impl CountingTransport {
    fn new(auth_failures: usize, login_delay_ms: u64) -> Self {
        Self {
            logins: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            auth_failures_remaining: AtomicUsize::new(auth_failures),
            login_delay_ms,
        }
    }
}

#[async_trait]
impl KrakenTransport for CountingTransport {
    async fn obtain_token(&self, _email: &str, _password: &str) -> Result<TokenGrant> {
        if self.login_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.login_delay_ms)).await;
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenGrant {
            token: format!("token-{}", n),
        })
    }

    async fn query(&self, _token: &str, _document: &str, _variables: Value) -> Result<Value> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let remaining = self.auth_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.auth_failures_remaining
                .fetch_sub(1, Ordering::SeqCst);
            return Err(TakodenError::auth("token expired (KT-CT-1124)"));
        }
        Ok(json!({ "ok": true }))
    }
}

fn auth_cfg(margin_minutes: u64, lifetime_minutes: u64) -> AuthConfig {
    AuthConfig {
        refresh_margin_minutes: margin_minutes,
        token_lifetime_minutes: lifetime_minutes,
    }
}

fn session(transport: Arc<CountingTransport>, cfg: &AuthConfig) -> AuthSession {
    AuthSession::new(
        transport,
        "user@example.com".to_string(),
        "secret".to_string(),
        cfg,
    )
}

#[tokio::test]
async fn fresh_token_is_reused_without_login() {
    let transport = Arc::new(CountingTransport::new(0, 0));
    let session = session(transport.clone(), &auth_cfg(10, 60));

    let first = session.ensure_valid().await.unwrap();
    let second = session.ensure_valid().await.unwrap();

    assert_eq!(transport.logins.load(Ordering::SeqCst), 1);
    assert_eq!(first.token, second.token);
    assert_eq!(first.expires_at, second.expires_at);
}

#[tokio::test]
async fn stale_token_triggers_exactly_one_refresh() {
    // Lifetime shorter than the margin means the token is born stale, so
    // every ensure_valid must refresh.
    let transport = Arc::new(CountingTransport::new(0, 0));
    let session = session(transport.clone(), &auth_cfg(10, 5));

    let first = session.ensure_valid().await.unwrap();
    assert_eq!(transport.logins.load(Ordering::SeqCst), 1);

    let second = session.ensure_valid().await.unwrap();
    assert_eq!(transport.logins.load(Ordering::SeqCst), 2);
    assert_ne!(first.token, second.token);
    assert!(second.expires_at >= first.expires_at);
}

#[tokio::test]
async fn concurrent_callers_share_one_login() {
    // Slow login widens the single-flight window
    let transport = Arc::new(CountingTransport::new(0, 50));
    let session = Arc::new(session(transport.clone(), &auth_cfg(10, 60)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let s = session.clone();
        handles.push(tokio::spawn(async move { s.ensure_valid().await }));
    }

    let mut tokens = Vec::new();
    for handle in handles {
        let cred = handle.await.unwrap().unwrap();
        tokens.push(cred.token);
    }

    assert_eq!(transport.logins.load(Ordering::SeqCst), 1);
    assert!(tokens.iter().all(|t| t == &tokens[0]));
}

#[tokio::test]
async fn auth_error_forces_one_relogin_then_succeeds() {
    let transport = Arc::new(CountingTransport::new(1, 0));
    let session = session(transport.clone(), &auth_cfg(10, 60));

    let data = session.request("query {}", json!({})).await.unwrap();
    assert_eq!(data, json!({ "ok": true }));

    // Initial login, then the forced re-login after the expiry error
    assert_eq!(transport.logins.load(Ordering::SeqCst), 2);
    assert_eq!(transport.queries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_consecutive_auth_failure_is_fatal() {
    let transport = Arc::new(CountingTransport::new(2, 0));
    let session = session(transport.clone(), &auth_cfg(10, 60));

    let err = session.request("query {}", json!({})).await.unwrap_err();
    assert!(err.is_auth());

    // Exactly one forced re-login, no retry loop
    assert_eq!(transport.logins.load(Ordering::SeqCst), 2);
    assert_eq!(transport.queries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_login_surfaces_auth_error() {
    struct RejectingTransport;

    #[async_trait]
    impl KrakenTransport for RejectingTransport {
        async fn obtain_token(&self, _email: &str, _password: &str) -> Result<TokenGrant> {
            Err(TakodenError::auth("invalid credentials"))
        }

        async fn query(&self, _token: &str, _document: &str, _variables: Value) -> Result<Value> {
            panic!("query must not be reached without a credential");
        }
    }

    let session = AuthSession::new(
        Arc::new(RejectingTransport),
        "user@example.com".to_string(),
        "wrong".to_string(),
        &auth_cfg(10, 60),
    );
    let err = session.ensure_valid().await.unwrap_err();
    assert!(err.is_auth());
}

//! Kraken GraphQL transport for Octopus Energy Japan
//!
//! This module owns the wire-level details: the GraphQL documents, the
//! reqwest-backed HTTP client with bounded retry/backoff, and detection of
//! the token-expiry error code so the session layer can re-login.

use crate::error::{Result, TakodenError};
use crate::logging::get_logger;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

/// Kraken error code denoting an expired or invalid JWT
pub const AUTH_EXPIRED_CODE: &str = "KT-CT-1124";

/// Mutation to obtain a Kraken JWT from account credentials
pub const OBTAIN_TOKEN_MUTATION: &str = r#"
mutation obtainKrakenToken($input: ObtainJSONWebTokenInput!) {
  obtainKrakenToken(input: $input) {
    refreshToken
    refreshExpiresIn
    payload
    token
  }
}
"#;

/// Query to discover the account number for the authenticated viewer
pub const ACCOUNT_VIEWER_QUERY: &str = r#"
query accountViewer {
  viewer {
    accounts {
      number
    }
  }
}
"#;

/// Query for half-hourly interval readings over a time range
pub const HALF_HOURLY_READINGS_QUERY: &str = r#"
query halfHourlyReadings($accountNumber: String!, $startTime: DateTime!, $endTime: DateTime!) {
  account(accountNumber: $accountNumber) {
    properties {
      electricitySupplyPoints {
        halfHourlyReadings(fromDatetime: $startTime, toDatetime: $endTime) {
          startAt
          endAt
          value
        }
      }
    }
  }
}
"#;

/// Query for balances and the most recent bill
pub const ACCOUNT_META_QUERY: &str = r#"
query accountMeta($accountNumber: String!) {
  account(accountNumber: $accountNumber) {
    number
    balance
    overdueBalance
    bills(first: 1, orderBy: FROM_DATE_DESC) {
      edges {
        node {
          id
          __typename
          ... on PeriodBasedDocumentType {
            issuedDate
            totalCharges {
              grossTotal
            }
          }
          ... on InvoiceType {
            issuedDate
            toDate
            grossAmount
          }
          ... on StatementType {
            issuedDate
            paymentDueDate
            totalCharges {
              grossTotal
            }
          }
        }
      }
    }
  }
}
"#;

/// Query for the active agreement's product and tariff structure
pub const PRODUCT_QUERY: &str = r#"
query productTariff($accountNumber: String!) {
  account(accountNumber: $accountNumber) {
    properties {
      electricitySupplyPoints {
        agreements(onlyActive: true) {
          product {
            ... on ProductInterface {
              displayName
              standingCharges {
                pricePerUnit
              }
              fuelCostAdjustment {
                pricePerUnit
              }
            }
            ... on ElectricitySingleStepProduct {
              consumptionCharges {
                pricePerUnit
              }
            }
            ... on ElectricitySteppedProduct {
              consumptionCharges {
                pricePerUnit
                stepStart
                stepEnd
              }
            }
          }
        }
      }
    }
  }
}
"#;

/// Raw result of a successful login
#[derive(Debug, Clone)]
pub struct TokenGrant {
    /// Bearer token for subsequent calls
    pub token: String,
}

/// Transport seam between the auth session and the wire
///
/// The production implementation is [`HttpTransport`]; tests substitute
/// counting mocks to exercise the refresh and single-flight policies.
#[async_trait]
pub trait KrakenTransport: Send + Sync {
    /// Exchange credentials for a bearer token
    async fn obtain_token(&self, email: &str, password: &str) -> Result<TokenGrant>;

    /// Execute an authenticated GraphQL document and return the `data` value
    async fn query(&self, token: &str, document: &str, variables: Value) -> Result<Value>;
}

/// Reqwest-backed transport with bounded exponential backoff
pub struct HttpTransport {
    client: reqwest::Client,
    api_url: String,
    max_retries: u32,
    retry_backoff: Duration,
    logger: crate::logging::StructuredLogger,
}

impl HttpTransport {
    /// Build a transport against the given endpoint
    pub fn new(api_url: &str, cfg: &crate::config::TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            max_retries: cfg.max_retries,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            logger: get_logger("kraken"),
        })
    }

    /// POST a GraphQL payload, retrying transport-level failures
    ///
    /// Network errors and 5xx responses are retried up to the configured
    /// bound with doubling backoff. 4xx responses and GraphQL errors are
    /// not retried here; the session layer decides what to do with auth
    /// failures.
    async fn post_graphql(&self, payload: &Value, token: Option<&str>) -> Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            let mut req = self
                .client
                .post(&self.api_url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(reqwest::header::ACCEPT, "application/json");
            if let Some(t) = token {
                // Kraken expects the JWT scheme rather than Bearer
                req = req.header(reqwest::header::AUTHORIZATION, format!("JWT {}", t));
            }

            let outcome = req.json(payload).send().await;
            match outcome {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() {
                        if attempt >= self.max_retries {
                            return Err(TakodenError::fetch(format!(
                                "Kraken API returned {} after {} attempts",
                                status,
                                attempt + 1
                            )));
                        }
                        self.logger.warn(&format!(
                            "Kraken API returned {}, retrying (attempt {})",
                            status,
                            attempt + 1
                        ));
                    } else if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(TakodenError::auth(format!(
                            "Kraken API rejected the request: {}",
                            status
                        )));
                    } else if !status.is_success() {
                        return Err(TakodenError::fetch(format!(
                            "Kraken API returned {}",
                            status
                        )));
                    } else {
                        let body: Value = resp.json().await?;
                        return classify_graphql_body(body);
                    }
                }
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(TakodenError::fetch(format!(
                            "Kraken API unreachable after {} attempts: {}",
                            attempt + 1,
                            err
                        )));
                    }
                    self.logger.warn(&format!(
                        "Kraken API request failed ({}), retrying (attempt {})",
                        err,
                        attempt + 1
                    ));
                }
            }

            let delay = self.retry_backoff * 2u32.saturating_pow(attempt);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Split a GraphQL body into data or a typed error
///
/// An `errors` entry carrying the token-expiry code becomes an `Auth`
/// error so the session can force a re-login; anything else is `Fetch`.
fn classify_graphql_body(body: Value) -> Result<Value> {
    if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
        let expired = errors.iter().any(|e| {
            e.get("extensions")
                .and_then(|x| x.get("errorCode"))
                .and_then(|c| c.as_str())
                .map(|c| c == AUTH_EXPIRED_CODE)
                .unwrap_or(false)
                || e.get("message")
                    .and_then(|m| m.as_str())
                    .map(|m| m.contains(AUTH_EXPIRED_CODE))
                    .unwrap_or(false)
        });
        let message = errors
            .first()
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("GraphQL error")
            .to_string();
        if expired {
            return Err(TakodenError::auth(format!(
                "token expired ({}): {}",
                AUTH_EXPIRED_CODE, message
            )));
        }
        return Err(TakodenError::fetch(message));
    }

    body.get("data")
        .cloned()
        .ok_or_else(|| TakodenError::fetch("GraphQL response missing data"))
}

#[async_trait]
impl KrakenTransport for HttpTransport {
    async fn obtain_token(&self, email: &str, password: &str) -> Result<TokenGrant> {
        let payload = json!({
            "query": OBTAIN_TOKEN_MUTATION,
            "variables": { "input": { "email": email, "password": password } },
        });

        let data = self.post_graphql(&payload, None).await.map_err(|e| {
            // A failed login is an auth failure regardless of transport class
            if e.is_auth() {
                e
            } else {
                TakodenError::auth(format!("login failed: {}", e))
            }
        })?;

        let token = data
            .get("obtainKrakenToken")
            .and_then(|t| t.get("token"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| TakodenError::auth("login response missing token"))?
            .to_string();

        Ok(TokenGrant { token })
    }

    async fn query(&self, token: &str, document: &str, variables: Value) -> Result<Value> {
        let payload = json!({ "query": document, "variables": variables });
        self.post_graphql(&payload, Some(token)).await
    }
}

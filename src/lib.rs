//! # Takoden - Octopus Energy Japan usage and cost driver
//!
//! A Rust driver that polls the Kraken GraphQL API (Octopus Energy Japan)
//! and derives usage and cost metrics for a home-automation platform.
//!
//! ## Features
//!
//! - **Token lifecycle**: proactive refresh before expiry, one reactive
//!   re-login on the Kraken token-expiry error code, single-flight guard
//!   so concurrent callers share one login
//! - **Tiered billing**: stepped-rate month-to-date cost and a full-month
//!   projection with fuel adjustment and standing charge
//! - **Typed sensors**: a fixed ten-sensor snapshot with units, state
//!   classes and extra attributes
//! - **Resilient polling**: bounded transport retries, per-cycle timeout,
//!   keep-last-good-snapshot on failure
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `config`: configuration management and validation
//! - `logging`: structured logging and tracing
//! - `error`: error taxonomy and `Result` alias
//! - `kraken`: GraphQL transport and query documents
//! - `auth`: credential store and authentication session
//! - `usage`: raw usage, bill and tariff retrieval
//! - `tariff`: pure tiered-rate cost derivation
//! - `snapshot`: typed sensor snapshot for the host platform
//! - `driver`: periodic refresh cycle orchestration

pub mod auth;
pub mod config;
pub mod driver;
pub mod error;
pub mod kraken;
pub mod logging;
pub mod snapshot;
pub mod tariff;
pub mod usage;

// Re-export commonly used types
pub use config::Config;
pub use driver::Poller;
pub use error::{Result, TakodenError};
pub use snapshot::{SensorKey, SensorSnapshot};

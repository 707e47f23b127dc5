//! Refresh cycle orchestration
//!
//! The [`Poller`] drives the fetch, compute, snapshot pipeline on a fixed
//! cadence. A failing or timed-out cycle is logged and abandoned; the last
//! good snapshot stays published until the next cycle succeeds. Cycle
//! failures never take the process down.

use crate::auth::AuthSession;
use crate::config::Config;
use crate::error::{Result, TakodenError};
use crate::kraken::{HttpTransport, KrakenTransport};
use crate::logging::get_logger;
use crate::snapshot::{SensorSnapshot, SnapshotInputs, build_snapshot};
use crate::tariff::{compute_month_to_date, compute_monthly_estimate};
use crate::usage::UsageFetcher;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, interval, timeout};

/// Periodic poller owning the session, fetcher and published snapshot
pub struct Poller {
    config: Config,
    fetcher: UsageFetcher,
    account_number: Option<String>,
    snapshot_tx: watch::Sender<Option<SensorSnapshot>>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
    logger: crate::logging::StructuredLogger,
}

impl Poller {
    /// Create a poller with the production HTTP transport
    pub fn new(config: Config) -> Result<Self> {
        let transport: Arc<dyn KrakenTransport> =
            Arc::new(HttpTransport::new(&config.account.api_url, &config.transport)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Create a poller over an arbitrary transport (used by tests)
    pub fn with_transport(config: Config, transport: Arc<dyn KrakenTransport>) -> Self {
        let session = Arc::new(AuthSession::new(
            transport,
            config.account.email.clone(),
            config.account.password.clone(),
            &config.auth,
        ));
        let fetcher = UsageFetcher::new(session, config.tz());
        let account_number = if config.account.account_number.is_empty() {
            None
        } else {
            Some(config.account.account_number.clone())
        };
        let (snapshot_tx, _) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        Self {
            config,
            fetcher,
            account_number,
            snapshot_tx,
            shutdown_tx,
            shutdown_rx,
            logger: get_logger("poller"),
        }
    }

    /// Subscribe to the latest published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<SensorSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Handle for requesting a clean shutdown
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    /// Run the periodic refresh loop until shutdown is requested
    pub async fn run(&mut self) -> Result<()> {
        let cadence = Duration::from_secs(self.config.poll_interval_minutes * 60);
        let cycle_budget = Duration::from_secs(self.config.cycle_timeout_seconds);
        let mut ticker = interval(cadence);

        self.logger.info(&format!(
            "poller starting, interval {} min, cycle budget {} s",
            self.config.poll_interval_minutes, self.config.cycle_timeout_seconds
        ));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match timeout(cycle_budget, self.run_cycle()).await {
                        Ok(Ok(snapshot)) => {
                            self.logger.info(&format!(
                                "cycle succeeded, {} sensors available",
                                snapshot.len()
                            ));
                            self.snapshot_tx.send_replace(Some(snapshot));
                        }
                        Ok(Err(e)) => {
                            self.logger.error(&format!(
                                "cycle failed, previous snapshot retained: {}",
                                e
                            ));
                        }
                        Err(_) => {
                            self.logger.error(&format!(
                                "cycle exceeded the {} s budget, previous snapshot retained",
                                self.config.cycle_timeout_seconds
                            ));
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("shutdown requested, stopping poller");
                    break;
                }
            }
        }
        Ok(())
    }

    /// One fetch, compute, snapshot pass
    pub async fn run_cycle(&mut self) -> Result<SensorSnapshot> {
        let account_number = self.resolve_account_number().await?;
        self.logger
            .debug(&format!("cycle started for account {}", account_number));

        let records = self.fetcher.fetch_month_to_date(&account_number).await?;
        let tariff = self.fetcher.fetch_tariff_schedule(&account_number).await?;
        let meta = self.fetcher.fetch_account_meta(&account_number).await?;
        let last_month_kwh = self.fetcher.fetch_last_month_total(&account_number).await?;

        let as_of = Utc::now().with_timezone(&self.config.tz());
        let aggregate = compute_month_to_date(&records, &tariff.schedule, as_of)?;
        self.logger.debug(&format!(
            "month to date: {:.2} kWh, {:.2} JPY over {} of {} days",
            aggregate.total_kwh,
            aggregate.total_cost_jpy(),
            aggregate.days_so_far,
            aggregate.days_in_month
        ));

        let estimate = match compute_monthly_estimate(&aggregate, &tariff.schedule) {
            Ok(est) => Some(est),
            Err(TakodenError::InsufficientData { message }) => {
                self.logger
                    .debug(&format!("estimate unavailable: {}", message));
                None
            }
            Err(e) => return Err(e),
        };

        Ok(build_snapshot(&SnapshotInputs {
            records: &records,
            aggregate: &aggregate,
            estimate: estimate.as_ref(),
            last_month_kwh: Some(last_month_kwh),
            meta: Some(&meta),
            tariff: Some(&tariff),
            as_of,
        }))
    }

    /// Use the configured account number or discover it once via the API
    async fn resolve_account_number(&mut self) -> Result<String> {
        if let Some(number) = &self.account_number {
            return Ok(number.clone());
        }
        let number = self.fetcher.discover_account_number().await?;
        self.logger
            .info(&format!("discovered account number {}", number));
        self.account_number = Some(number.clone());
        Ok(number)
    }
}

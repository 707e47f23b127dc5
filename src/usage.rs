//! Usage and account data retrieval
//!
//! The [`UsageFetcher`] pulls raw interval consumption, balances, bills and
//! the active tariff through the authenticated session, and normalizes the
//! GraphQL payloads into typed values. Records handed to the tariff
//! calculator are deduplicated, sorted, and stripped of invalid readings.

use crate::auth::AuthSession;
use crate::error::{Result, TakodenError};
use crate::kraken::{
    ACCOUNT_META_QUERY, ACCOUNT_VIEWER_QUERY, HALF_HOURLY_READINGS_QUERY, PRODUCT_QUERY,
};
use crate::logging::get_logger;
use crate::tariff::{TariffSchedule, TariffTier};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// One half-hourly consumption reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalUsageRecord {
    /// Start of the half-hour period
    pub period_start: DateTime<Utc>,

    /// End of the half-hour period
    pub period_end: DateTime<Utc>,

    /// Consumption in kWh for the period
    pub kwh: f64,
}

/// Summary of the most recent bill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillSummary {
    /// Opaque bill document id
    pub id: Option<String>,

    /// Bill document shape reported by the API
    pub bill_type: Option<String>,

    /// Gross total of the bill
    pub gross_total_jpy: Option<f64>,

    /// Issue date as reported
    pub issued_date: Option<String>,

    /// Payment due date where the document shape carries one
    pub due_date: Option<String>,
}

/// Balances and latest bill for the account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountMeta {
    /// Current account balance in JPY
    pub balance_jpy: Option<f64>,

    /// Overdue balance in JPY
    pub overdue_balance_jpy: Option<f64>,

    /// Most recent bill, if any exists
    pub last_bill: Option<BillSummary>,
}

/// Active product with its tariff structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductTariff {
    /// Product display name
    pub product_name: String,

    /// Parsed tariff schedule
    pub schedule: TariffSchedule,
}

/// Fetches raw usage and billing data through the auth session
pub struct UsageFetcher {
    session: Arc<AuthSession>,
    tz: Tz,
    logger: crate::logging::StructuredLogger,
}

impl UsageFetcher {
    /// Create a fetcher over the shared session
    pub fn new(session: Arc<AuthSession>, tz: Tz) -> Self {
        Self {
            session,
            tz,
            logger: get_logger("usage"),
        }
    }

    /// Discover the account number for the authenticated viewer
    pub async fn discover_account_number(&self) -> Result<String> {
        let data = self
            .session
            .request(ACCOUNT_VIEWER_QUERY, json!({}))
            .await?;
        data.get("viewer")
            .and_then(|v| v.get("accounts"))
            .and_then(|a| a.as_array())
            .and_then(|a| a.first())
            .and_then(|a| a.get("number"))
            .and_then(|n| n.as_str())
            .map(str::to_string)
            .ok_or_else(|| TakodenError::fetch("account number not found in API response"))
    }

    /// Fetch current-month readings from the first of the month up to now
    ///
    /// The returned records are deduplicated by period start, sorted
    /// ascending, and free of negative readings (dropped with a warning).
    pub async fn fetch_month_to_date(&self, account_number: &str) -> Result<Vec<IntervalUsageRecord>> {
        let now = Utc::now().with_timezone(&self.tz);
        let start = month_start(now)?;
        self.fetch_readings(account_number, start.with_timezone(&Utc), now.with_timezone(&Utc))
            .await
    }

    /// Fetch the previous calendar month's total consumption
    pub async fn fetch_last_month_total(&self, account_number: &str) -> Result<f64> {
        let now = Utc::now().with_timezone(&self.tz);
        let this_month = month_start(now)?;
        let last_month = previous_month_start(this_month)?;
        let records = self
            .fetch_readings(
                account_number,
                last_month.with_timezone(&Utc),
                this_month.with_timezone(&Utc),
            )
            .await?;
        Ok(records.iter().map(|r| r.kwh).sum())
    }

    /// Fetch balances and the latest bill
    pub async fn fetch_account_meta(&self, account_number: &str) -> Result<AccountMeta> {
        let data = self
            .session
            .request(ACCOUNT_META_QUERY, json!({ "accountNumber": account_number }))
            .await?;
        let account = data
            .get("account")
            .ok_or_else(|| TakodenError::fetch("account meta response missing account"))?;

        Ok(AccountMeta {
            balance_jpy: number_field(account.get("balance")),
            overdue_balance_jpy: number_field(account.get("overdueBalance")),
            last_bill: parse_latest_bill(account),
        })
    }

    /// Fetch the active product and its tariff schedule
    pub async fn fetch_tariff_schedule(&self, account_number: &str) -> Result<ProductTariff> {
        let data = self
            .session
            .request(PRODUCT_QUERY, json!({ "accountNumber": account_number }))
            .await?;

        let product = data
            .get("account")
            .and_then(|a| a.get("properties"))
            .and_then(|p| p.as_array())
            .and_then(|p| p.first())
            .and_then(|p| p.get("electricitySupplyPoints"))
            .and_then(|s| s.as_array())
            .and_then(|s| s.first())
            .and_then(|s| s.get("agreements"))
            .and_then(|a| a.as_array())
            .and_then(|a| a.first())
            .and_then(|a| a.get("product"))
            .ok_or_else(|| TakodenError::fetch("no active agreement in product response"))?;

        let product_name = product
            .get("displayName")
            .and_then(|n| n.as_str())
            .unwrap_or("Unknown")
            .to_string();

        let schedule = parse_tariff_schedule(product)?;
        schedule.validate()?;

        self.logger.debug(&format!(
            "tariff parsed: {} steps, fuel {:.4}/kWh, standing {:.2}/month",
            schedule.tiers.len(),
            schedule.fuel_adjustment_per_kwh,
            schedule.standing_charge_jpy
        ));

        Ok(ProductTariff {
            product_name,
            schedule,
        })
    }

    /// Fetch and normalize readings for a half-open time range
    async fn fetch_readings(
        &self,
        account_number: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IntervalUsageRecord>> {
        let variables = json!({
            "accountNumber": account_number,
            "startTime": start.to_rfc3339(),
            "endTime": end.to_rfc3339(),
        });
        let data = self
            .session
            .request(HALF_HOURLY_READINGS_QUERY, variables)
            .await?;

        let readings = data
            .get("account")
            .and_then(|a| a.get("properties"))
            .and_then(|p| p.as_array())
            .and_then(|p| p.first())
            .and_then(|p| p.get("electricitySupplyPoints"))
            .and_then(|s| s.as_array())
            .and_then(|s| s.first())
            .and_then(|s| s.get("halfHourlyReadings"))
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();

        let mut records = Vec::with_capacity(readings.len());
        let mut dropped = 0usize;
        for reading in &readings {
            let Some(record) = parse_reading(reading) else {
                dropped += 1;
                continue;
            };
            if record.kwh < 0.0 {
                self.logger.warn(&format!(
                    "dropping negative reading {} kWh at {}",
                    record.kwh, record.period_start
                ));
                dropped += 1;
                continue;
            }
            records.push(record);
        }
        if dropped > 0 {
            self.logger
                .warn(&format!("dropped {} invalid readings", dropped));
        }

        Ok(normalize_records(records))
    }
}

/// Midnight on the first of the month containing `now`
pub fn month_start(now: DateTime<Tz>) -> Result<DateTime<Tz>> {
    let tz = now.timezone();
    tz.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .ok_or_else(|| TakodenError::generic("ambiguous month start in timezone"))
}

/// Midnight on the first of the month before the given month start
pub fn previous_month_start(this_month: DateTime<Tz>) -> Result<DateTime<Tz>> {
    let tz = this_month.timezone();
    let (year, month) = if this_month.month() == 1 {
        (this_month.year() - 1, 12)
    } else {
        (this_month.year(), this_month.month() - 1)
    };
    tz.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| TakodenError::generic("ambiguous month start in timezone"))
}

/// Sort by period start and drop duplicate periods, keeping the first
pub fn normalize_records(mut records: Vec<IntervalUsageRecord>) -> Vec<IntervalUsageRecord> {
    records.sort_by_key(|r| r.period_start);
    records.dedup_by_key(|r| r.period_start);
    records
}

/// Parse one half-hourly reading entry
///
/// `endAt` is absent from some payloads; the periods are fixed half-hour
/// slots, so a missing end is derived from the start.
fn parse_reading(reading: &Value) -> Option<IntervalUsageRecord> {
    let start = reading.get("startAt").and_then(|s| s.as_str())?;
    let period_start = DateTime::parse_from_rfc3339(start)
        .ok()?
        .with_timezone(&Utc);
    let period_end = reading
        .get("endAt")
        .and_then(|s| s.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(
            || period_start + Duration::minutes(30),
            |end| end.with_timezone(&Utc),
        );
    let kwh = number_field(reading.get("value"))?;
    Some(IntervalUsageRecord {
        period_start,
        period_end,
        kwh,
    })
}

/// Numbers in Kraken payloads arrive as JSON numbers or decimal strings
fn number_field(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Extract the newest bill across the three document shapes
fn parse_latest_bill(account: &Value) -> Option<BillSummary> {
    let node = account
        .get("bills")
        .and_then(|b| b.get("edges"))
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|e| e.get("node"))?;

    let bill_type = node
        .get("__typename")
        .and_then(|t| t.as_str())
        .map(str::to_string);

    let (gross_total_jpy, due_date) = match bill_type.as_deref() {
        Some("PeriodBasedDocumentType") => (
            number_field(node.get("totalCharges").and_then(|t| t.get("grossTotal"))),
            None,
        ),
        Some("InvoiceType") => (
            number_field(node.get("grossAmount")),
            node.get("toDate").and_then(|d| d.as_str()).map(str::to_string),
        ),
        Some("StatementType") => (
            number_field(node.get("totalCharges").and_then(|t| t.get("grossTotal"))),
            node.get("paymentDueDate")
                .and_then(|d| d.as_str())
                .map(str::to_string),
        ),
        _ => (None, None),
    };

    Some(BillSummary {
        id: node.get("id").and_then(|i| i.as_str()).map(str::to_string),
        bill_type,
        gross_total_jpy,
        issued_date: node
            .get("issuedDate")
            .and_then(|d| d.as_str())
            .map(str::to_string),
        due_date,
    })
}

/// Build a schedule from the product's charges
///
/// Stepped products carry stepStart/stepEnd per charge; single-step
/// products become a one-tier unbounded schedule.
fn parse_tariff_schedule(product: &Value) -> Result<TariffSchedule> {
    let standing_charge_jpy = product
        .get("standingCharges")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| number_field(c.get("pricePerUnit")))
        .ok_or_else(|| TakodenError::fetch("product missing standing charge"))?;

    let fuel_adjustment_per_kwh = product
        .get("fuelCostAdjustment")
        .and_then(|f| number_field(f.get("pricePerUnit")))
        .unwrap_or(0.0);

    let charges = product
        .get("consumptionCharges")
        .and_then(|c| c.as_array())
        .cloned()
        .ok_or_else(|| TakodenError::fetch("product missing consumption charges"))?;
    if charges.is_empty() {
        return Err(TakodenError::fetch("product has no consumption charges"));
    }

    let mut steps: Vec<(f64, Option<f64>, f64)> = Vec::with_capacity(charges.len());
    for charge in &charges {
        let price = number_field(charge.get("pricePerUnit"))
            .ok_or_else(|| TakodenError::fetch("consumption charge missing price"))?;
        let step_start = number_field(charge.get("stepStart")).unwrap_or(0.0);
        let step_end = match charge.get("stepEnd") {
            None | Some(Value::Null) => None,
            Some(v) => number_field(Some(v)),
        };
        steps.push((step_start, step_end, price));
    }
    steps.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let tiers = steps
        .into_iter()
        .map(|(_, end, price)| TariffTier {
            upper_kwh: end,
            unit_price_jpy: price,
        })
        .collect();

    Ok(TariffSchedule {
        tiers,
        fuel_adjustment_per_kwh,
        standing_charge_jpy,
    })
}

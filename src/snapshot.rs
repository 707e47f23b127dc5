//! Typed sensor snapshot for the host platform
//!
//! A [`SensorSnapshot`] is the fixed, enumerable set of sensor values one
//! refresh cycle produces. Each sensor carries its unit, accumulation
//! semantics, and extra attributes. Building is a pure transformation;
//! an absent upstream value marks only the affected sensor unavailable.

use crate::error::{Result, TakodenError};
use crate::logging::get_logger;
use crate::tariff::{EstimateResult, MonthlyAggregate};
use crate::usage::{AccountMeta, IntervalUsageRecord, ProductTariff};
use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// The fixed sensor key set exposed to the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKey {
    TodayConsumption,
    YesterdayConsumption,
    CurrentMonthConsumption,
    CurrentMonthCost,
    LastMonthConsumption,
    MonthlyEstimate,
    Balance,
    OverdueBalance,
    LastBill,
    Product,
}

impl SensorKey {
    /// All sensor keys in display order
    pub const ALL: [SensorKey; 10] = [
        SensorKey::TodayConsumption,
        SensorKey::YesterdayConsumption,
        SensorKey::CurrentMonthConsumption,
        SensorKey::CurrentMonthCost,
        SensorKey::LastMonthConsumption,
        SensorKey::MonthlyEstimate,
        SensorKey::Balance,
        SensorKey::OverdueBalance,
        SensorKey::LastBill,
        SensorKey::Product,
    ];

    /// Stable string key used by the host platform
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKey::TodayConsumption => "today_consumption",
            SensorKey::YesterdayConsumption => "yesterday_consumption",
            SensorKey::CurrentMonthConsumption => "current_month_consumption",
            SensorKey::CurrentMonthCost => "current_month_cost",
            SensorKey::LastMonthConsumption => "last_month_consumption",
            SensorKey::MonthlyEstimate => "monthly_estimate",
            SensorKey::Balance => "balance",
            SensorKey::OverdueBalance => "overdue_balance",
            SensorKey::LastBill => "last_bill",
            SensorKey::Product => "product",
        }
    }

    /// Unit of measurement for this sensor
    pub fn unit(&self) -> Unit {
        match self {
            SensorKey::TodayConsumption
            | SensorKey::YesterdayConsumption
            | SensorKey::CurrentMonthConsumption
            | SensorKey::LastMonthConsumption => Unit::KilowattHour,
            SensorKey::CurrentMonthCost
            | SensorKey::MonthlyEstimate
            | SensorKey::Balance
            | SensorKey::OverdueBalance
            | SensorKey::LastBill => Unit::Yen,
            SensorKey::Product => Unit::None,
        }
    }

    /// Accumulation semantics for this sensor
    pub fn state_class(&self) -> StateClass {
        match self {
            // Counters that grow through the day/month and reset at the boundary
            SensorKey::TodayConsumption
            | SensorKey::YesterdayConsumption
            | SensorKey::CurrentMonthConsumption
            | SensorKey::LastMonthConsumption => StateClass::TotalIncreasing,
            SensorKey::CurrentMonthCost
            | SensorKey::MonthlyEstimate
            | SensorKey::Balance
            | SensorKey::OverdueBalance
            | SensorKey::LastBill => StateClass::Total,
            SensorKey::Product => StateClass::None,
        }
    }
}

/// Unit of measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    KilowattHour,
    Yen,
    None,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::KilowattHour => "kWh",
            Unit::Yen => "JPY",
            Unit::None => "",
        }
    }
}

/// Accumulation semantics as understood by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    TotalIncreasing,
    Total,
    None,
}

impl StateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateClass::TotalIncreasing => "total_increasing",
            StateClass::Total => "total",
            StateClass::None => "",
        }
    }
}

/// A sensor's value: numeric for metered values, text for the product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

/// One rendered sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub value: SensorValue,
    pub unit: Unit,
    pub state_class: StateClass,
    pub attributes: Map<String, Value>,
}

/// The full set of sensors produced by one refresh cycle
///
/// Sensors whose upstream value was absent are simply missing from the
/// map; the host renders them unavailable while the others update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSnapshot {
    readings: BTreeMap<SensorKey, SensorReading>,

    /// When this snapshot was produced
    pub produced_at: DateTime<Utc>,
}

impl SensorSnapshot {
    /// Look up a sensor reading
    pub fn get(&self, key: SensorKey) -> Option<&SensorReading> {
        self.readings.get(&key)
    }

    /// Whether a sensor is available in this snapshot
    pub fn is_available(&self, key: SensorKey) -> bool {
        self.readings.contains_key(&key)
    }

    /// Number of available sensors
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// True when no sensor is available
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Iterate available sensors in key order
    pub fn iter(&self) -> impl Iterator<Item = (&SensorKey, &SensorReading)> {
        self.readings.iter()
    }
}

/// Everything one refresh cycle gathered, ready to be shaped into sensors
pub struct SnapshotInputs<'a> {
    /// Month-to-date interval records, normalized
    pub records: &'a [IntervalUsageRecord],

    /// Month-to-date aggregate
    pub aggregate: &'a MonthlyAggregate,

    /// Month-end projection; None when there was not enough elapsed data
    pub estimate: Option<&'a EstimateResult>,

    /// Previous month's total consumption
    pub last_month_kwh: Option<f64>,

    /// Balances and latest bill
    pub meta: Option<&'a AccountMeta>,

    /// Active product and tariff
    pub tariff: Option<&'a ProductTariff>,

    /// The cycle's as-of instant in the account timezone
    pub as_of: DateTime<Tz>,
}

/// Shape the cycle's data into the fixed sensor set
///
/// Each sensor is built independently; a missing upstream value logs a
/// warning and omits just that sensor.
pub fn build_snapshot(inputs: &SnapshotInputs<'_>) -> SensorSnapshot {
    let logger = get_logger("snapshot");
    let mut readings = BTreeMap::new();

    for key in SensorKey::ALL {
        match build_sensor(key, inputs) {
            Ok(reading) => {
                readings.insert(key, reading);
            }
            Err(e) => {
                logger.warn(&format!("sensor {} unavailable: {}", key.as_str(), e));
            }
        }
    }

    SensorSnapshot {
        readings,
        produced_at: Utc::now(),
    }
}

fn build_sensor(key: SensorKey, inputs: &SnapshotInputs<'_>) -> Result<SensorReading> {
    match key {
        SensorKey::TodayConsumption => {
            let total = daily_total(inputs.records, inputs.as_of.date_naive(), inputs.as_of.timezone());
            let mut attributes = Map::new();
            if let Some(last) = inputs.records.last() {
                attributes.insert(
                    "last_reading_at".to_string(),
                    json!(last.period_end.to_rfc3339()),
                );
            }
            Ok(numeric(key, round2(total), attributes))
        }
        SensorKey::YesterdayConsumption => {
            let yesterday = inputs.as_of.date_naive() - Duration::days(1);
            // Only meaningful when yesterday is in the fetched month window
            if yesterday.month() != inputs.as_of.month() || yesterday.year() != inputs.as_of.year()
            {
                return Err(TakodenError::missing_data(
                    key.as_str(),
                    "yesterday falls outside the fetched month",
                ));
            }
            let total = daily_total(inputs.records, yesterday, inputs.as_of.timezone());
            Ok(numeric(key, round2(total), Map::new()))
        }
        SensorKey::CurrentMonthConsumption => {
            let mut attributes = Map::new();
            attributes.insert("days_so_far".to_string(), json!(inputs.aggregate.days_so_far));
            attributes.insert(
                "days_in_month".to_string(),
                json!(inputs.aggregate.days_in_month),
            );
            Ok(numeric(key, round2(inputs.aggregate.total_kwh), attributes))
        }
        SensorKey::CurrentMonthCost => {
            let agg = inputs.aggregate;
            let mut attributes = Map::new();
            attributes.insert("total_kwh".to_string(), json!(round2(agg.total_kwh)));
            attributes.insert("usage_cost".to_string(), json!(round2(agg.usage_cost_jpy)));
            attributes.insert(
                "fuel_cost".to_string(),
                json!(round2(agg.fuel_adjustment_jpy)),
            );
            attributes.insert(
                "standing_cost".to_string(),
                json!(round2(agg.standing_cost_jpy)),
            );
            attributes.insert("days_so_far".to_string(), json!(agg.days_so_far));
            Ok(numeric(key, round2(agg.total_cost_jpy()), attributes))
        }
        SensorKey::LastMonthConsumption => {
            let kwh = inputs.last_month_kwh.ok_or_else(|| {
                TakodenError::missing_data(key.as_str(), "last month total not fetched")
            })?;
            Ok(numeric(key, round2(kwh), Map::new()))
        }
        SensorKey::MonthlyEstimate => {
            let est = inputs.estimate.ok_or_else(|| {
                TakodenError::missing_data(key.as_str(), "insufficient data for an estimate")
            })?;
            let mut attributes = Map::new();
            attributes.insert(
                "daily_average".to_string(),
                json!(round2(est.daily_avg_kwh)),
            );
            attributes.insert(
                "estimated_month_kwh".to_string(),
                json!(round2(est.estimated_month_kwh)),
            );
            attributes.insert(
                "usage_cost".to_string(),
                json!(round2(est.estimated_usage_cost_jpy)),
            );
            attributes.insert(
                "fuel_cost".to_string(),
                json!(round2(est.fuel_adjustment_jpy)),
            );
            attributes.insert(
                "standing_cost".to_string(),
                json!(round2(est.standing_cost_jpy)),
            );
            attributes.insert(
                "total_kwh_so_far".to_string(),
                json!(round2(inputs.aggregate.total_kwh)),
            );
            attributes.insert("days_so_far".to_string(), json!(inputs.aggregate.days_so_far));
            Ok(numeric(key, round2(est.total_jpy), attributes))
        }
        SensorKey::Balance => {
            let balance = inputs
                .meta
                .and_then(|m| m.balance_jpy)
                .ok_or_else(|| TakodenError::missing_data(key.as_str(), "balance absent"))?;
            Ok(numeric(key, round2(balance), Map::new()))
        }
        SensorKey::OverdueBalance => {
            let overdue = inputs
                .meta
                .and_then(|m| m.overdue_balance_jpy)
                .ok_or_else(|| {
                    TakodenError::missing_data(key.as_str(), "overdue balance absent")
                })?;
            Ok(numeric(key, round2(overdue), Map::new()))
        }
        SensorKey::LastBill => {
            let bill = inputs
                .meta
                .and_then(|m| m.last_bill.as_ref())
                .ok_or_else(|| TakodenError::missing_data(key.as_str(), "no bills issued"))?;
            let amount = bill.gross_total_jpy.ok_or_else(|| {
                TakodenError::missing_data(key.as_str(), "bill carries no gross total")
            })?;
            let mut attributes = Map::new();
            if let Some(id) = &bill.id {
                attributes.insert("bill_id".to_string(), json!(id));
            }
            if let Some(t) = &bill.bill_type {
                attributes.insert("bill_type".to_string(), json!(t));
            }
            if let Some(d) = &bill.issued_date {
                attributes.insert("issued_date".to_string(), json!(d));
            }
            if let Some(d) = &bill.due_date {
                attributes.insert("due_date".to_string(), json!(d));
            }
            Ok(numeric(key, round2(amount), attributes))
        }
        SensorKey::Product => {
            let tariff = inputs
                .tariff
                .ok_or_else(|| TakodenError::missing_data(key.as_str(), "tariff not fetched"))?;
            let mut attributes = Map::new();
            attributes.insert(
                "standing_charge".to_string(),
                json!(tariff.schedule.standing_charge_jpy),
            );
            attributes.insert(
                "fuel_cost_adjustment".to_string(),
                json!(tariff.schedule.fuel_adjustment_per_kwh),
            );
            if tariff.schedule.tiers.len() == 1 {
                attributes.insert(
                    "unit_rate".to_string(),
                    json!(tariff.schedule.tiers[0].unit_price_jpy),
                );
            } else {
                let mut floor = 0.0;
                for (i, tier) in tariff.schedule.tiers.iter().enumerate() {
                    let range = match tier.upper_kwh {
                        Some(upper) => format!("({}~{})", floor, upper),
                        None => format!("({}~)", floor),
                    };
                    attributes.insert(
                        format!("unit_rate_step_{}", i + 1),
                        json!(format!("{}: {}", range, tier.unit_price_jpy)),
                    );
                    if let Some(upper) = tier.upper_kwh {
                        floor = upper;
                    }
                }
            }
            Ok(SensorReading {
                value: SensorValue::Text(tariff.product_name.clone()),
                unit: key.unit(),
                state_class: key.state_class(),
                attributes,
            })
        }
    }
}

fn numeric(key: SensorKey, value: f64, attributes: Map<String, Value>) -> SensorReading {
    SensorReading {
        value: SensorValue::Number(value),
        unit: key.unit(),
        state_class: key.state_class(),
        attributes,
    }
}

/// Sum of readings whose period starts on the given local date
fn daily_total(records: &[IntervalUsageRecord], date: chrono::NaiveDate, tz: Tz) -> f64 {
    records
        .iter()
        .filter(|r| r.period_start.with_timezone(&tz).date_naive() == date)
        .map(|r| r.kwh)
        .sum()
}

/// Round to two decimals at the presentation boundary
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

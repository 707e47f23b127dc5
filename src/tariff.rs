//! Tiered tariff cost derivation
//!
//! Pure, deterministic billing math with no I/O: stepped-rate allocation,
//! month-to-date aggregation, and the full-month projection. Amounts are
//! JPY; rounding is left to the snapshot boundary.

use crate::error::{Result, TakodenError};
use crate::usage::IntervalUsageRecord;
use chrono::{DateTime, Datelike, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// One step of a stepped tariff
///
/// `upper_kwh` is the cumulative upper bound of the step; `None` marks the
/// final unbounded step. The boundary is inclusive of the lower step:
/// consumption landing exactly on a bound bills entirely at that step's
/// price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffTier {
    /// Cumulative kWh upper bound; None = unbounded final step
    pub upper_kwh: Option<f64>,

    /// Price per kWh in JPY for consumption within this step
    pub unit_price_jpy: f64,
}

/// Provider-supplied tariff for one billing period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffSchedule {
    /// Ordered consumption steps, cheapest-first
    pub tiers: Vec<TariffTier>,

    /// Fuel cost adjustment per kWh (may be negative)
    pub fuel_adjustment_per_kwh: f64,

    /// Standing charge for a full month
    pub standing_charge_jpy: f64,
}

impl TariffSchedule {
    /// Check the provider-supplied invariants: non-negative prices and
    /// strictly increasing step bounds with only the last step unbounded.
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(TakodenError::invalid_data("tariff has no consumption steps"));
        }
        let mut previous_upper = 0.0_f64;
        let last = self.tiers.len() - 1;
        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.unit_price_jpy < 0.0 {
                return Err(TakodenError::invalid_data(format!(
                    "negative unit price in step {}",
                    i + 1
                )));
            }
            match tier.upper_kwh {
                Some(upper) => {
                    if i == last {
                        return Err(TakodenError::invalid_data(
                            "final tariff step must be unbounded",
                        ));
                    }
                    if upper <= previous_upper {
                        return Err(TakodenError::invalid_data(format!(
                            "step bounds must be strictly increasing (step {})",
                            i + 1
                        )));
                    }
                    previous_upper = upper;
                }
                None => {
                    if i != last {
                        return Err(TakodenError::invalid_data(
                            "only the final tariff step may be unbounded",
                        ));
                    }
                }
            }
        }
        if self.standing_charge_jpy < 0.0 {
            return Err(TakodenError::invalid_data("negative standing charge"));
        }
        Ok(())
    }
}

/// Month-to-date billing aggregate, recomputed every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    /// Consumption in the current month up to the as-of date
    pub total_kwh: f64,

    /// Stepped consumption cost (excluding fuel adjustment)
    pub usage_cost_jpy: f64,

    /// Fuel cost adjustment on the month-to-date consumption
    pub fuel_adjustment_jpy: f64,

    /// Standing charge prorated to the elapsed days
    pub standing_cost_jpy: f64,

    /// Elapsed days including the as-of day (day 1 = 1 elapsed day)
    pub days_so_far: u32,

    /// Calendar length of the as-of month
    pub days_in_month: u32,
}

impl MonthlyAggregate {
    /// Total month-to-date cost
    pub fn total_cost_jpy(&self) -> f64 {
        self.usage_cost_jpy + self.fuel_adjustment_jpy + self.standing_cost_jpy
    }
}

/// Full-month cost projection derived from a month-to-date aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateResult {
    /// Average consumption per elapsed day
    pub daily_avg_kwh: f64,

    /// Projected consumption for the full month
    pub estimated_month_kwh: f64,

    /// Stepped consumption cost on the projected kWh
    pub estimated_usage_cost_jpy: f64,

    /// Fuel cost adjustment on the projected kWh
    pub fuel_adjustment_jpy: f64,

    /// Full-month standing charge (not prorated)
    pub standing_cost_jpy: f64,

    /// Projected month-end total
    pub total_jpy: f64,
}

/// Apply the stepped tariff to a cumulative consumption figure
///
/// kWh fill the first step up to its bound, the remainder spills into the
/// next step, and so on. Monotone non-decreasing in `total_kwh`.
pub fn stepped_usage_cost(total_kwh: f64, tiers: &[TariffTier]) -> Result<f64> {
    if total_kwh < 0.0 {
        return Err(TakodenError::invalid_data(format!(
            "negative consumption: {} kWh",
            total_kwh
        )));
    }

    let mut cost = 0.0;
    let mut floor = 0.0;
    let mut remaining = total_kwh;
    for tier in tiers {
        if remaining <= 0.0 {
            break;
        }
        let allotment = match tier.upper_kwh {
            Some(upper) => remaining.min(upper - floor),
            None => remaining,
        };
        cost += allotment * tier.unit_price_jpy;
        remaining -= allotment;
        if let Some(upper) = tier.upper_kwh {
            floor = upper;
        }
    }
    Ok(cost)
}

/// Aggregate month-to-date consumption and cost
///
/// Records outside the as-of month (in the as-of timezone) are ignored.
/// The standing charge is prorated linearly over elapsed days, which is
/// what distinguishes the month-to-date figure from the month-end one.
pub fn compute_month_to_date(
    records: &[IntervalUsageRecord],
    schedule: &TariffSchedule,
    as_of: DateTime<Tz>,
) -> Result<MonthlyAggregate> {
    let tz = as_of.timezone();
    let as_of_date = as_of.date_naive();

    let mut total_kwh = 0.0;
    for record in records {
        if record.kwh < 0.0 {
            return Err(TakodenError::invalid_data(format!(
                "negative consumption reading at {}",
                record.period_start
            )));
        }
        let local = record.period_start.with_timezone(&tz);
        let local_date = local.date_naive();
        if local_date.year() == as_of_date.year()
            && local_date.month() == as_of_date.month()
            && local_date <= as_of_date
        {
            total_kwh += record.kwh;
        }
    }

    let days_so_far = as_of_date.day();
    let days_in_month = days_in_month(as_of_date.year(), as_of_date.month());

    let usage_cost_jpy = stepped_usage_cost(total_kwh, &schedule.tiers)?;
    let fuel_adjustment_jpy = total_kwh * schedule.fuel_adjustment_per_kwh;
    let standing_cost_jpy =
        schedule.standing_charge_jpy * f64::from(days_so_far) / f64::from(days_in_month);

    Ok(MonthlyAggregate {
        total_kwh,
        usage_cost_jpy,
        fuel_adjustment_jpy,
        standing_cost_jpy,
        days_so_far,
        days_in_month,
    })
}

/// Project the month-end cost from the month-to-date aggregate
///
/// Daily average times days-in-month, re-tiered from zero; the standing
/// charge is the full monthly figure. This replaces extrapolating by the
/// elapsed fraction of the billing cycle.
pub fn compute_monthly_estimate(
    aggregate: &MonthlyAggregate,
    schedule: &TariffSchedule,
) -> Result<EstimateResult> {
    if aggregate.days_so_far == 0 {
        return Err(TakodenError::insufficient_data(
            "no elapsed days to derive a daily average",
        ));
    }

    let daily_avg_kwh = aggregate.total_kwh / f64::from(aggregate.days_so_far);
    let estimated_month_kwh = daily_avg_kwh * f64::from(aggregate.days_in_month);
    let estimated_usage_cost_jpy = stepped_usage_cost(estimated_month_kwh, &schedule.tiers)?;
    let fuel_adjustment_jpy = estimated_month_kwh * schedule.fuel_adjustment_per_kwh;
    let standing_cost_jpy = schedule.standing_charge_jpy;

    Ok(EstimateResult {
        daily_avg_kwh,
        estimated_month_kwh,
        estimated_usage_cost_jpy,
        fuel_adjustment_jpy,
        standing_cost_jpy,
        total_jpy: estimated_usage_cost_jpy + fuel_adjustment_jpy + standing_cost_jpy,
    })
}

/// Calendar length of a month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (first, next_first) {
        (Some(a), Some(b)) => (b - a).num_days() as u32,
        _ => 30,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use chrono_tz::Asia::Tokyo;

    fn two_step_schedule() -> TariffSchedule {
        TariffSchedule {
            tiers: vec![
                TariffTier {
                    upper_kwh: Some(200.0),
                    unit_price_jpy: 20.0,
                },
                TariffTier {
                    upper_kwh: None,
                    unit_price_jpy: 25.0,
                },
            ],
            fuel_adjustment_per_kwh: 3.0,
            standing_charge_jpy: 800.0,
        }
    }

    fn records_totaling(kwh: f64, year: i32, month: u32, day: u32) -> Vec<IntervalUsageRecord> {
        // One reading at local noon keeps the month attribution unambiguous
        let local = Tokyo.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap();
        let period_start = local.with_timezone(&Utc);
        vec![IntervalUsageRecord {
            period_start,
            period_end: period_start + Duration::minutes(30),
            kwh,
        }]
    }

    #[test]
    fn stepped_cost_worked_scenario() {
        let schedule = two_step_schedule();
        // 200 kWh at 20 + 50 kWh at 25
        let cost = stepped_usage_cost(250.0, &schedule.tiers).unwrap();
        assert!((cost - 5250.0).abs() < 1e-9);
    }

    #[test]
    fn stepped_cost_boundary_is_inclusive() {
        let schedule = two_step_schedule();
        let cost = stepped_usage_cost(200.0, &schedule.tiers).unwrap();
        assert!((cost - 4000.0).abs() < 1e-9);
    }

    #[test]
    fn stepped_cost_monotone_in_kwh() {
        let schedule = two_step_schedule();
        let mut previous = 0.0;
        for step in 0..=600 {
            let kwh = step as f64;
            let cost = stepped_usage_cost(kwh, &schedule.tiers).unwrap();
            assert!(cost >= previous, "cost decreased at {} kWh", kwh);
            previous = cost;
        }
    }

    #[test]
    fn stepped_cost_rejects_negative() {
        let schedule = two_step_schedule();
        assert!(stepped_usage_cost(-1.0, &schedule.tiers).is_err());
    }

    #[test]
    fn month_to_date_worked_scenario() {
        let schedule = two_step_schedule();
        let records = records_totaling(250.0, 2026, 6, 10);
        let as_of = Tokyo.with_ymd_and_hms(2026, 6, 10, 15, 0, 0).unwrap();

        let agg = compute_month_to_date(&records, &schedule, as_of).unwrap();
        assert!((agg.total_kwh - 250.0).abs() < 1e-9);
        assert!((agg.usage_cost_jpy - 5250.0).abs() < 1e-9);
        assert!((agg.fuel_adjustment_jpy - 750.0).abs() < 1e-9);
        // 800 * 10/30
        assert!((agg.standing_cost_jpy - 266.666_666_666_67).abs() < 1e-6);
        assert_eq!(agg.days_so_far, 10);
        assert_eq!(agg.days_in_month, 30);
        assert!((agg.total_cost_jpy() - 6266.666_666_666_67).abs() < 1e-6);
    }

    #[test]
    fn month_to_date_ignores_other_months() {
        let schedule = two_step_schedule();
        let mut records = records_totaling(100.0, 2026, 6, 5);
        records.extend(records_totaling(999.0, 2026, 5, 31));
        let as_of = Tokyo.with_ymd_and_hms(2026, 6, 10, 0, 0, 0).unwrap();

        let agg = compute_month_to_date(&records, &schedule, as_of).unwrap();
        assert!((agg.total_kwh - 100.0).abs() < 1e-9);
    }

    #[test]
    fn month_attribution_uses_local_timezone() {
        let schedule = two_step_schedule();
        // 2026-05-31T23:00:00 UTC is 2026-06-01T08:00 in Tokyo
        let period_start = Utc.with_ymd_and_hms(2026, 5, 31, 23, 0, 0).unwrap();
        let records = vec![IntervalUsageRecord {
            period_start,
            period_end: period_start + Duration::minutes(30),
            kwh: 42.0,
        }];
        let as_of = Tokyo.with_ymd_and_hms(2026, 6, 2, 12, 0, 0).unwrap();
        let agg = compute_month_to_date(&records, &schedule, as_of).unwrap();
        assert!((agg.total_kwh - 42.0).abs() < 1e-9);
    }

    #[test]
    fn standing_cost_linear_in_elapsed_days() {
        let schedule = two_step_schedule();
        let records = records_totaling(50.0, 2026, 6, 1);

        let day5 = Tokyo.with_ymd_and_hms(2026, 6, 5, 12, 0, 0).unwrap();
        let day10 = Tokyo.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap();

        let a = compute_month_to_date(&records, &schedule, day5).unwrap();
        let b = compute_month_to_date(&records, &schedule, day10).unwrap();
        assert!((b.standing_cost_jpy - 2.0 * a.standing_cost_jpy).abs() < 1e-9);
    }

    #[test]
    fn estimate_worked_scenario() {
        let schedule = two_step_schedule();
        let agg = MonthlyAggregate {
            total_kwh: 250.0,
            usage_cost_jpy: 5250.0,
            fuel_adjustment_jpy: 750.0,
            standing_cost_jpy: 800.0 * 10.0 / 30.0,
            days_so_far: 10,
            days_in_month: 30,
        };

        let est = compute_monthly_estimate(&agg, &schedule).unwrap();
        assert!((est.daily_avg_kwh - 25.0).abs() < 1e-9);
        assert!((est.estimated_month_kwh - 750.0).abs() < 1e-9);
        // 200*20 + 550*25
        assert!((est.estimated_usage_cost_jpy - 17_750.0).abs() < 1e-9);
        assert!((est.fuel_adjustment_jpy - 2250.0).abs() < 1e-9);
        assert!((est.standing_cost_jpy - 800.0).abs() < 1e-9);
        assert!((est.total_jpy - 20_800.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_is_idempotent() {
        let schedule = two_step_schedule();
        let agg = MonthlyAggregate {
            total_kwh: 123.4,
            usage_cost_jpy: 2468.0,
            fuel_adjustment_jpy: 370.2,
            standing_cost_jpy: 200.0,
            days_so_far: 7,
            days_in_month: 31,
        };
        let a = compute_monthly_estimate(&agg, &schedule).unwrap();
        let b = compute_monthly_estimate(&agg, &schedule).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn estimate_requires_elapsed_days() {
        let schedule = two_step_schedule();
        let agg = MonthlyAggregate {
            total_kwh: 0.0,
            usage_cost_jpy: 0.0,
            fuel_adjustment_jpy: 0.0,
            standing_cost_jpy: 0.0,
            days_so_far: 0,
            days_in_month: 30,
        };
        let err = compute_monthly_estimate(&agg, &schedule).unwrap_err();
        assert!(matches!(
            err,
            crate::error::TakodenError::InsufficientData { .. }
        ));
    }

    #[test]
    fn schedule_validation() {
        let mut schedule = two_step_schedule();
        assert!(schedule.validate().is_ok());

        // Final step must be unbounded
        schedule.tiers[1].upper_kwh = Some(400.0);
        assert!(schedule.validate().is_err());

        // Bounds strictly increasing
        let mut schedule = two_step_schedule();
        schedule.tiers.insert(
            1,
            TariffTier {
                upper_kwh: Some(150.0),
                unit_price_jpy: 22.0,
            },
        );
        assert!(schedule.validate().is_err());

        // Negative price rejected
        let mut schedule = two_step_schedule();
        schedule.tiers[0].unit_price_jpy = -1.0;
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn days_in_month_covers_leap_years() {
        assert_eq!(days_in_month(2026, 2), 28);
        assert_eq!(days_in_month(2028, 2), 29);
        assert_eq!(days_in_month(2026, 12), 31);
        assert_eq!(days_in_month(2026, 4), 30);
    }
}

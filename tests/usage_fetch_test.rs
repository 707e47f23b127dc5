use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use takoden::auth::AuthSession;
use takoden::config::AuthConfig;
use takoden::error::Result;
use takoden::kraken::{KrakenTransport, TokenGrant};
use takoden::usage::UsageFetcher;

/// Transport serving canned payloads keyed by the requested document
struct CannedTransport;

#[async_trait]
impl KrakenTransport for CannedTransport {
    async fn obtain_token(&self, _email: &str, _password: &str) -> Result<TokenGrant> {
        Ok(TokenGrant {
            token: "canned-token".to_string(),
        })
    }

    async fn query(&self, _token: &str, document: &str, _variables: Value) -> Result<Value> {
        if document.contains("accountViewer") {
            return Ok(json!({
                "viewer": { "accounts": [{ "number": "A-12345678" }] }
            }));
        }
        if document.contains("halfHourlyReadings") {
            // Out of order, one duplicate period, one negative reading
            return Ok(json!({
                "account": { "properties": [{ "electricitySupplyPoints": [{
                    "halfHourlyReadings": [
                        { "startAt": "2026-06-10T01:00:00+00:00", "endAt": "2026-06-10T01:30:00+00:00", "value": "0.30" },
                        { "startAt": "2026-06-10T00:00:00+00:00", "endAt": "2026-06-10T00:30:00+00:00", "value": "0.50" },
                        { "startAt": "2026-06-10T00:30:00+00:00", "endAt": "2026-06-10T01:00:00+00:00", "value": "-0.10" },
                        { "startAt": "2026-06-10T01:00:00+00:00", "endAt": "2026-06-10T01:30:00+00:00", "value": "9.99" }
                    ]
                }]}]}
            }));
        }
        if document.contains("overdueBalance") {
            return Ok(json!({
                "account": {
                    "number": "A-12345678",
                    "balance": 2500,
                    "overdueBalance": "0",
                    "bills": { "edges": [{ "node": {
                        "id": "QmlsbDox",
                        "__typename": "PeriodBasedDocumentType",
                        "issuedDate": "2026-06-05",
                        "totalCharges": { "grossTotal": "7890" }
                    }}]}
                }
            }));
        }
        if document.contains("agreements") {
            return Ok(json!({
                "account": { "properties": [{ "electricitySupplyPoints": [{
                    "agreements": [{ "product": {
                        "displayName": "Green Octopus",
                        "standingCharges": [{ "pricePerUnit": "800.00" }],
                        "fuelCostAdjustment": { "pricePerUnit": "3.00" },
                        "consumptionCharges": [
                            { "pricePerUnit": "20.00", "stepStart": "0", "stepEnd": "200" },
                            { "pricePerUnit": "25.00", "stepStart": "200", "stepEnd": null }
                        ]
                    }}]
                }]}]}
            }));
        }
        Ok(json!({}))
    }
}

fn fetcher() -> UsageFetcher {
    let session = Arc::new(AuthSession::new(
        Arc::new(CannedTransport),
        "user@example.com".to_string(),
        "secret".to_string(),
        &AuthConfig::default(),
    ));
    UsageFetcher::new(session, chrono_tz::Asia::Tokyo)
}

#[tokio::test]
async fn discovers_account_number() {
    let number = fetcher().discover_account_number().await.unwrap();
    assert_eq!(number, "A-12345678");
}

#[tokio::test]
async fn readings_are_deduped_sorted_and_cleaned() {
    let records = fetcher().fetch_month_to_date("A-12345678").await.unwrap();

    // Negative reading dropped, duplicate period collapsed
    assert_eq!(records.len(), 2);
    assert!(records[0].period_start < records[1].period_start);
    assert!(records.iter().all(|r| r.kwh >= 0.0));
    // First occurrence after the sort wins for the duplicated period
    assert!((records[1].kwh - 0.30).abs() < 1e-9);
    // Period ends come straight from the payload's endAt
    assert_eq!(
        records[0].period_end - records[0].period_start,
        chrono::Duration::minutes(30)
    );
}

#[tokio::test]
async fn last_month_total_sums_valid_readings() {
    let total = fetcher().fetch_last_month_total("A-12345678").await.unwrap();
    assert!((total - 0.80).abs() < 1e-9);
}

#[tokio::test]
async fn account_meta_parses_balances_and_bill() {
    let meta = fetcher().fetch_account_meta("A-12345678").await.unwrap();
    assert_eq!(meta.balance_jpy, Some(2500.0));
    assert_eq!(meta.overdue_balance_jpy, Some(0.0));

    let bill = meta.last_bill.unwrap();
    assert_eq!(bill.gross_total_jpy, Some(7890.0));
    assert_eq!(bill.bill_type.as_deref(), Some("PeriodBasedDocumentType"));
    assert_eq!(bill.issued_date.as_deref(), Some("2026-06-05"));
}

#[tokio::test]
async fn tariff_schedule_is_parsed_and_valid() {
    let tariff = fetcher().fetch_tariff_schedule("A-12345678").await.unwrap();
    assert_eq!(tariff.product_name, "Green Octopus");
    assert_eq!(tariff.schedule.tiers.len(), 2);
    assert_eq!(tariff.schedule.tiers[0].upper_kwh, Some(200.0));
    assert_eq!(tariff.schedule.tiers[1].upper_kwh, None);
    assert!((tariff.schedule.standing_charge_jpy - 800.0).abs() < 1e-9);
    assert!((tariff.schedule.fuel_adjustment_per_kwh - 3.0).abs() < 1e-9);
}

//! S3 billing-data model
//!
//! Cost Explorer reports S3 line items under USAGE_TYPE keys like
//! `USE2-Requests-Tier1` or `APN1-TimedStorage`: a billing location code,
//! then the billable component. This module owns the key parsing, the
//! billing-code -> AWS-region table, and the accumulation of usage/cost
//! into per-(region, component) unit rates.

use std::collections::HashMap;

use tracing::debug;

use crate::client::{CostGroup, CostPage};

/// Average hours in a month, used to turn monthly storage cost into an
/// hourly rate.
pub const HOURS_IN_MONTH: f64 = 730.5;

/// GovCloud keys carry a `-` inside the location name, so they are matched
/// as whole prefixes before the key is split. Longest prefix first.
const GOVCLOUD_PREFIXES: &[(&str, &str)] = &[
    ("AWS GovCloud (US-East)", "us-gov-east-1"),
    ("AWS GovCloud (US)", "us-gov-west-1"),
];

/// Billing location code -> AWS region. Codes observed in S3 USAGE_TYPE
/// keys; an unknown code yields an empty region and the line item is
/// dropped.
fn region_for_billing_code(code: &str) -> Option<&'static str> {
    let region = match code {
        "APE1" => "ap-east-1",
        "APN1" => "ap-northeast-1",
        "APN2" => "ap-northeast-2",
        "APN3" => "ap-northeast-3",
        "APS1" => "ap-southeast-1",
        "APS2" => "ap-southeast-2",
        "APS3" => "ap-south-1",
        "APS4" => "ap-southeast-3",
        "APS5" => "ap-south-2",
        "APS6" => "ap-southeast-4",
        "CAN1" => "ca-central-1",
        "CAN2" => "ca-west-1",
        "CPT" => "af-south-1",
        "EU" => "eu-west-1",
        "EUC1" => "eu-central-1",
        "EUC2" => "eu-central-2",
        "EUN1" => "eu-north-1",
        "EUS1" => "eu-south-1",
        "EUS2" => "eu-south-2",
        "EUW2" => "eu-west-2",
        "EUW3" => "eu-west-3",
        "ILC1" => "il-central-1",
        "MEC1" => "me-central-1",
        "MES1" => "me-south-1",
        "SAE1" => "sa-east-1",
        "UGE1" => "us-gov-east-1",
        "UGW1" => "us-gov-west-1",
        "USE1" => "us-east-1",
        "USE2" => "us-east-2",
        "USW1" => "us-west-1",
        "USW2" => "us-west-2",
        _ => return None,
    };
    Some(region)
}

/// Parse a USAGE_TYPE key into `(region, component)`.
///
/// Either side may come back empty, in which case the line item is not a
/// billable dimension we track and is dropped by the caller:
/// - unknown or absent location code -> empty region;
/// - a second location code in component position (regional data
///   transfer) -> empty component;
/// - `Requests` keeps its tier suffix (`Requests-Tier1` / `Requests-Tier2`).
pub fn parse_billing_key(key: &str) -> (String, String) {
    for (prefix, region) in GOVCLOUD_PREFIXES {
        if let Some(rest) = key.strip_prefix(prefix) {
            let rest = rest.strip_prefix('-').unwrap_or(rest);
            let parts: Vec<&str> = rest.split('-').collect();
            return ((*region).to_string(), component_from_parts(&parts));
        }
    }

    let parts: Vec<&str> = key.split('-').collect();
    if parts.len() < 2 {
        return (String::new(), String::new());
    }
    let Some(region) = region_for_billing_code(parts[0]) else {
        return (String::new(), String::new());
    };
    (region.to_string(), component_from_parts(&parts[1..]))
}

fn component_from_parts(parts: &[&str]) -> String {
    let Some(first) = parts.first().copied().filter(|p| !p.is_empty()) else {
        return String::new();
    };
    if region_for_billing_code(first).is_some() {
        // Regional transfer overhead, not a component we price.
        return String::new();
    }
    if first == "Requests" {
        if let Some(tier) = parts.get(1) {
            return format!("Requests-{tier}");
        }
    }
    first.to_string()
}

/// Rate derivation per component kind. Usage of zero yields zero: no NaN
/// or infinity may reach the metrics sink.
fn derive_unit_cost(component: &str, usage: f64, cost: f64) -> f64 {
    if usage == 0.0 {
        return 0.0;
    }
    let unit_cost = match component {
        "Requests-Tier1" | "Requests-Tier2" => cost / usage / 1_000.0,
        "TimedStorage" => cost / HOURS_IN_MONTH / usage,
        _ => cost / usage,
    };
    if unit_cost.is_finite() { unit_cost } else { 0.0 }
}

/// Accumulated usage, cost and the derived unit rate for one
/// `(region, component)` pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pricing {
    pub usage: f64,
    pub cost: f64,
    pub unit: String,
    pub unit_cost: f64,
}

/// S3 billing record: `region -> component -> Pricing`, additive across
/// Cost Explorer pages and days.
#[derive(Debug, Clone, Default)]
pub struct BillingData {
    pub regions: HashMap<String, HashMap<String, Pricing>>,
}

impl BillingData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one page of Cost Explorer output into the record.
    pub fn consume_page(&mut self, page: &CostPage) {
        for group in &page.groups {
            self.add_group(group);
        }
    }

    /// Aggregate a single USAGE_TYPE group. Missing or malformed amounts
    /// are skipped silently; the unit cost is re-derived after every
    /// mutation.
    pub fn add_group(&mut self, group: &CostGroup) {
        let (region, component) = parse_billing_key(&group.key);
        if region.is_empty() || component.is_empty() {
            debug!(key = %group.key, "skipping billing key without region or component");
            return;
        }

        let entry = self
            .regions
            .entry(region)
            .or_default()
            .entry(component.clone())
            .or_default();
        if let Some(usage) = parse_amount(group.usage_amount.as_deref()) {
            entry.usage += usage;
        }
        if let Some(cost) = parse_amount(group.cost_amount.as_deref()) {
            entry.cost += cost;
        }
        if let Some(unit) = group.usage_unit.as_deref() {
            entry.unit = unit.to_string();
        }
        entry.unit_cost = derive_unit_cost(&component, entry.usage, entry.cost);
    }
}

fn parse_amount(raw: Option<&str>) -> Option<f64> {
    raw.filter(|s| !s.is_empty())?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(key: &str, usage: &str, cost: &str) -> CostGroup {
        CostGroup {
            key: key.to_string(),
            usage_amount: Some(usage.to_string()),
            usage_unit: Some("unit".to_string()),
            cost_amount: Some(cost.to_string()),
        }
    }

    #[test]
    fn test_parse_billing_key_request_tier() {
        let (region, component) = parse_billing_key("USE2-Requests-Tier1");
        assert_eq!(region, "us-east-2");
        assert_eq!(component, "Requests-Tier1");
    }

    #[test]
    fn test_parse_billing_key_timed_storage() {
        let (region, component) = parse_billing_key("APN1-TimedStorage");
        assert_eq!(region, "ap-northeast-1");
        assert_eq!(component, "TimedStorage");
    }

    #[test]
    fn test_parse_billing_key_govcloud() {
        let (region, component) = parse_billing_key("AWS GovCloud (US-East)-Requests-Tier1");
        assert_eq!(region, "us-gov-east-1");
        assert_eq!(component, "Requests-Tier1");

        let (region, component) = parse_billing_key("AWS GovCloud (US)-TimedStorage");
        assert_eq!(region, "us-gov-west-1");
        assert_eq!(component, "TimedStorage");
    }

    #[test]
    fn test_parse_billing_key_without_region_prefix() {
        assert_eq!(parse_billing_key("Requests-Tier1"), (String::new(), String::new()));
        assert_eq!(parse_billing_key("Requests-Tier2"), (String::new(), String::new()));
    }

    #[test]
    fn test_parse_billing_key_unknown_region() {
        assert_eq!(
            parse_billing_key("non-existent-region"),
            (String::new(), String::new())
        );
    }

    #[test]
    fn test_parse_billing_key_single_part() {
        assert_eq!(parse_billing_key("TimedStorage"), (String::new(), String::new()));
    }

    #[test]
    fn test_parse_billing_key_regional_transfer_has_no_component() {
        let (region, component) = parse_billing_key("USE1-USE2-AWS-Out-Bytes");
        assert_eq!(region, "us-east-1");
        assert_eq!(component, "");
    }

    #[test]
    fn test_billing_code_table_matches_fixture() {
        let fixture = include_str!("../testdata/billing_codes.csv");
        for line in fixture.lines().skip(1).filter(|l| !l.is_empty()) {
            let (code, region) = line.split_once(',').unwrap();
            let (parsed_region, component) = parse_billing_key(&format!("{code}-TimedStorage"));
            assert_eq!(parsed_region, region, "code {code}");
            assert_eq!(component, "TimedStorage", "code {code}");
        }
    }

    #[test]
    fn test_parse_billing_key_is_idempotent_over_known_keys() {
        for key in [
            "USE2-Requests-Tier1",
            "APN1-TimedStorage",
            "AWS GovCloud (US-East)-Requests-Tier1",
            "Requests-Tier1",
            "non-existent-region",
            "EU-Requests-Tier2",
        ] {
            assert_eq!(parse_billing_key(key), parse_billing_key(key));
        }
    }

    #[test]
    fn test_unit_cost_requests_per_thousand() {
        assert_eq!(derive_unit_cost("Requests-Tier1", 1.0, 1.0), 0.001);
        assert_eq!(derive_unit_cost("Requests-Tier2", 2_000_000.0, 8.0), 8.0 / 2_000_000.0 / 1_000.0);
    }

    #[test]
    fn test_unit_cost_timed_storage_hourly() {
        let rate = derive_unit_cost("TimedStorage", 1.0, 1.0);
        assert!((rate - 0.0013689253935660506).abs() < 1e-18);
    }

    #[test]
    fn test_unit_cost_other_component() {
        assert_eq!(derive_unit_cost("DataTransfer", 4.0, 2.0), 0.5);
    }

    #[test]
    fn test_unit_cost_zero_usage_is_zero() {
        assert_eq!(derive_unit_cost("Requests-Tier1", 0.0, 12.0), 0.0);
        assert_eq!(derive_unit_cost("TimedStorage", 0.0, 12.0), 0.0);
    }

    #[test]
    fn test_unit_cost_never_negative_for_positive_usage() {
        for component in ["Requests-Tier1", "Requests-Tier2", "TimedStorage", "Other"] {
            for usage in [0.001, 1.0, 5_000.0] {
                for cost in [0.0, 0.25, 900.0] {
                    assert!(derive_unit_cost(component, usage, cost) >= 0.0);
                }
            }
        }
    }

    #[test]
    fn test_add_group_accumulates_same_key() {
        let mut data = BillingData::new();
        for _ in 0..3 {
            data.add_group(&group("APN1-Requests-Tier1", "10", "2"));
        }

        assert_eq!(data.regions.len(), 1);
        let model = &data.regions["ap-northeast-1"];
        assert_eq!(model.len(), 1);
        let pricing = &model["Requests-Tier1"];
        assert_eq!(pricing.usage, 30.0);
        assert_eq!(pricing.cost, 6.0);
        assert_eq!(pricing.unit_cost, 6.0 / 30.0 / 1_000.0);
    }

    #[test]
    fn test_add_group_drops_empty_region_or_component() {
        let mut data = BillingData::new();
        data.add_group(&group("Requests-Tier1", "1", "1"));
        data.add_group(&group("non-existent-region", "1", "1"));
        data.add_group(&group("USE1-USE2-AWS-Out-Bytes", "1", "1"));
        assert!(data.regions.is_empty());
    }

    #[test]
    fn test_add_group_missing_amount_still_recomputes_unit_cost() {
        let mut data = BillingData::new();
        data.add_group(&group("USE1-TimedStorage", "2", "4"));

        // A follow-up day with no cost amount: usage still accumulates and
        // the unit cost is re-derived.
        data.add_group(&CostGroup {
            key: "USE1-TimedStorage".to_string(),
            usage_amount: Some("2".to_string()),
            usage_unit: None,
            cost_amount: None,
        });

        let pricing = &data.regions["us-east-1"]["TimedStorage"];
        assert_eq!(pricing.usage, 4.0);
        assert_eq!(pricing.cost, 4.0);
        assert_eq!(pricing.unit_cost, 4.0 / HOURS_IN_MONTH / 4.0);
    }

    #[test]
    fn test_add_group_empty_amount_string_is_skipped() {
        let mut data = BillingData::new();
        data.add_group(&CostGroup {
            key: "USE1-Requests-Tier1".to_string(),
            usage_amount: Some(String::new()),
            usage_unit: Some("Requests".to_string()),
            cost_amount: Some("3".to_string()),
        });

        let pricing = &data.regions["us-east-1"]["Requests-Tier1"];
        assert_eq!(pricing.usage, 0.0);
        assert_eq!(pricing.cost, 3.0);
        assert_eq!(pricing.unit_cost, 0.0);
    }

    #[test]
    fn test_consume_page_folds_all_groups() {
        let mut data = BillingData::new();
        data.consume_page(&CostPage {
            groups: vec![
                group("APN1-Requests-Tier1", "1", "1"),
                group("APN2-Requests-Tier2", "1", "1"),
            ],
            next_page_token: None,
        });
        assert!(data.regions.contains_key("ap-northeast-1"));
        assert!(data.regions.contains_key("ap-northeast-2"));
    }
}

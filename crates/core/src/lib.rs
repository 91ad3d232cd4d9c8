use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One ingestion target produced by blob discovery. The path is either a
/// concrete blob name (flat report) or a `prefix/*.csv` wildcard
/// (partitioned report).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPath {
    pub path: String,
    pub account_id: String,
    pub connector_id: String,
    pub tenant_id: String,
    pub report_year: String,
    pub report_month: String,
}

impl ReportPath {
    /// Parse a discovered path of the form
    /// `account/connector/tenant/report/month/file.csv` or
    /// `account/connector/tenant/report/month/day/exportId/*.csv`.
    ///
    /// The month folder is `YYYYMMDD-YYYYMMDD`; the report year and month
    /// come from its first eight digits.
    pub fn parse(path: &str) -> Option<ReportPath> {
        let parts: Vec<&str> = path.split('/').collect();
        let month_folder = match parts.len() {
            6 => parts[parts.len() - 2],
            8 => parts[parts.len() - 4],
            _ => return None,
        };
        let digits = month_folder.split('-').next().unwrap_or("");
        if digits.len() < 6 {
            return None;
        }
        Some(ReportPath {
            path: path.to_string(),
            account_id: parts[0].to_string(),
            connector_id: parts[1].to_string(),
            tenant_id: parts[2].to_string(),
            report_year: digits[..4].to_string(),
            report_month: digits[4..6].to_string(),
        })
    }

    /// Staging table for this report, unique per (year, month, connector).
    pub fn staging_table(&self) -> String {
        format!(
            "azureBilling_{}_{}_{}",
            self.report_year, self.report_month, self.connector_id
        )
    }
}

/// Inclusive calendar window covering the report month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthWindow {
    pub date_start: String,
    pub date_end: String,
}

pub fn month_window(year: &str, month: &str) -> Option<MonthWindow> {
    let year_num: i32 = year.parse().ok()?;
    let month_num: u32 = month.parse().ok()?;
    let first = NaiveDate::from_ymd_opt(year_num, month_num, 1)?;
    let next = if month_num == 12 {
        NaiveDate::from_ymd_opt(year_num + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year_num, month_num + 1, 1)?
    };
    let last = next.pred_opt()?;
    Some(MonthWindow {
        date_start: first.format("%Y-%m-%d").to_string(),
        date_end: last.format("%Y-%m-%d").to_string(),
    })
}

/// Resolved source column for every canonical billing field. All values are
/// lowercase column names as they exist in the staging table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub start_time: String,
    pub resource_rate: String,
    pub currency: String,
    pub cost: String,
    pub subscription_guid: String,
    pub instance_id: String,
    pub resource_group: String,
}

// Candidate source columns per canonical field, in preference order. Azure
// export column names vary across format versions; first match wins.
// Ref: https://docs.microsoft.com/en-us/azure/cost-management-billing/understand/mca-understand-your-usage
const START_TIME_CANDIDATES: &[&str] = &["date", "usagedatetime"];
const RESOURCE_RATE_CANDIDATES: &[&str] = &["effectiveprice", "resourcerate"];
const CURRENCY_CANDIDATES: &[&str] = &["billingcurrency", "currency", "billingcurrencycode"];
const COST_CANDIDATES: &[&str] = &["costinbillingcurrency", "pretaxcost", "cost"];
const SUBSCRIPTION_CANDIDATES: &[&str] = &["subscriptionid", "subscriptionguid"];
const INSTANCE_ID_CANDIDATES: &[&str] = &["resourceid", "instanceid", "instancename"];
const RESOURCE_GROUP_CANDIDATES: &[&str] = &["resourcegroup", "resourcegroupname"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingError {
    pub field: &'static str,
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no mapping found for {} column", self.field)
    }
}

impl std::error::Error for MappingError {}

fn resolve_field(
    columns: &BTreeSet<String>,
    field: &'static str,
    candidates: &[&str],
) -> Result<String, MappingError> {
    candidates
        .iter()
        .find(|candidate| columns.contains(**candidate))
        .map(|candidate| candidate.to_string())
        .ok_or(MappingError { field })
}

/// Resolve the canonical column mapping against the lowercase column set of
/// one export file. Every field must resolve; a partial mapping is rejected.
pub fn resolve_column_mapping(columns: &BTreeSet<String>) -> Result<ColumnMapping, MappingError> {
    Ok(ColumnMapping {
        start_time: resolve_field(columns, "startTime", START_TIME_CANDIDATES)?,
        resource_rate: resolve_field(columns, "azureResourceRate", RESOURCE_RATE_CANDIDATES)?,
        currency: resolve_field(columns, "currency", CURRENCY_CANDIDATES)?,
        cost: resolve_field(columns, "cost", COST_CANDIDATES)?,
        subscription_guid: resolve_field(
            columns,
            "azureSubscriptionGuid",
            SUBSCRIPTION_CANDIDATES,
        )?,
        instance_id: resolve_field(columns, "azureInstanceId", INSTANCE_ID_CANDIDATES)?,
        resource_group: resolve_field(columns, "azureResourceGroup", RESOURCE_GROUP_CANDIDATES)?,
    })
}

/// Extra column projected into the unified table for specific accounts only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraColumn {
    pub name: String,
    #[serde(default)]
    pub cast_to_int: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSettings {
    #[serde(default)]
    pub markup_percent: f64,
    #[serde(default)]
    pub extra_columns: Vec<ExtraColumn>,
}

/// Static per-account configuration, injected from the markup TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkupConfig {
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountSettings>,
}

impl MarkupConfig {
    pub fn extra_columns(&self, account_id: &str) -> &[ExtraColumn] {
        self.accounts
            .get(account_id)
            .map(|settings| settings.extra_columns.as_slice())
            .unwrap_or(&[])
    }
}

/// Currency conversion supplied by the job context; both values arrive
/// together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyContext {
    pub preferred_currency: String,
    pub fx_rate_src_to_dest: f64,
}

/// Per-run values from the environment, as opposed to static configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobContext {
    pub cost_markup_override: Option<f64>,
    pub currency: Option<CurrencyContext>,
}

/// Markup multiplier for an account. A nonzero per-run override wins over
/// the static table; zero anywhere means no markup.
pub fn cost_markup_factor(
    markup: &MarkupConfig,
    account_id: &str,
    override_percent: Option<f64>,
) -> f64 {
    let percent = override_percent
        .filter(|value| *value != 0.0)
        .unwrap_or_else(|| {
            markup
                .accounts
                .get(account_id)
                .map(|settings| settings.markup_percent)
                .unwrap_or(0.0)
        });
    if percent != 0.0 {
        1.0 + percent / 100.0
    } else {
        1.0
    }
}

/// Column name a label key flattens into: `label_` plus the key with every
/// run of non-alphanumeric characters collapsed to one underscore.
pub fn label_column_name(key: &str) -> String {
    let mut name = String::from("label_");
    let mut last_underscore = false;
    for ch in key.chars() {
        if ch.is_ascii_alphanumeric() {
            name.push(ch);
            last_underscore = false;
        } else if !last_underscore {
            name.push('_');
            last_underscore = true;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn parse_flat_report_path() {
        let report =
            ReportPath::parse("acct1/conn1/tenant1/reportA/20240101-20240131/export.csv")
                .expect("parse");
        assert_eq!(report.account_id, "acct1");
        assert_eq!(report.connector_id, "conn1");
        assert_eq!(report.tenant_id, "tenant1");
        assert_eq!(report.report_year, "2024");
        assert_eq!(report.report_month, "01");
        assert_eq!(report.staging_table(), "azureBilling_2024_01_conn1");
    }

    #[test]
    fn parse_partitioned_wildcard_path() {
        let report = ReportPath::parse(
            "acct1/conn1/tenant1/reportA/20240201-20240229/20240215/export-id/*.csv",
        )
        .expect("parse");
        assert_eq!(report.report_year, "2024");
        assert_eq!(report.report_month, "02");
    }

    #[test]
    fn parse_rejects_unexpected_segment_count() {
        assert_eq!(ReportPath::parse("a/b/c/d.csv"), None);
        assert_eq!(ReportPath::parse("a/b/c/d/e/f/g.csv"), None);
    }

    #[test]
    fn month_window_handles_month_lengths() {
        let window = month_window("2024", "02").expect("window");
        assert_eq!(window.date_start, "2024-02-01");
        assert_eq!(window.date_end, "2024-02-29");
        let window = month_window("2023", "12").expect("window");
        assert_eq!(window.date_end, "2023-12-31");
    }

    #[test]
    fn mapping_prefers_candidates_in_order() {
        let mapping = resolve_column_mapping(&columns(&[
            "date",
            "effectiveprice",
            "billingcurrency",
            "costinbillingcurrency",
            "pretaxcost",
            "subscriptionid",
            "resourceid",
            "resourcegroup",
        ]))
        .expect("mapping");
        assert_eq!(mapping.cost, "costinbillingcurrency");
        assert_eq!(mapping.start_time, "date");
        assert_eq!(mapping.resource_rate, "effectiveprice");
    }

    #[test]
    fn mapping_falls_back_to_pretaxcost() {
        let mapping = resolve_column_mapping(&columns(&[
            "usagedatetime",
            "resourcerate",
            "currency",
            "pretaxcost",
            "subscriptionguid",
            "instanceid",
            "resourcegroupname",
        ]))
        .expect("mapping");
        assert_eq!(mapping.cost, "pretaxcost");
        assert_eq!(mapping.start_time, "usagedatetime");
        assert_eq!(mapping.subscription_guid, "subscriptionguid");
    }

    #[test]
    fn mapping_is_order_independent() {
        let forward = columns(&[
            "date",
            "resourcerate",
            "currency",
            "cost",
            "subscriptionid",
            "instancename",
            "resourcegroup",
        ]);
        let reversed: BTreeSet<String> = forward.iter().rev().cloned().collect();
        assert_eq!(
            resolve_column_mapping(&forward).expect("forward"),
            resolve_column_mapping(&reversed).expect("reversed")
        );
    }

    #[test]
    fn mapping_error_names_missing_field() {
        let err = resolve_column_mapping(&columns(&["date", "resourcerate"])).unwrap_err();
        assert_eq!(err.field, "currency");
        assert_eq!(err.to_string(), "no mapping found for currency column");
    }

    #[test]
    fn markup_override_wins_when_nonzero() {
        let mut markup = MarkupConfig::default();
        markup.accounts.insert(
            "acct".to_string(),
            AccountSettings {
                markup_percent: 5.0,
                extra_columns: Vec::new(),
            },
        );
        assert_eq!(cost_markup_factor(&markup, "acct", Some(10.0)), 1.1);
        assert_eq!(cost_markup_factor(&markup, "acct", Some(0.0)), 1.05);
        assert_eq!(cost_markup_factor(&markup, "acct", None), 1.05);
        assert_eq!(cost_markup_factor(&markup, "other", None), 1.0);
    }

    #[test]
    fn label_column_names_are_sanitized() {
        assert_eq!(label_column_name("team"), "label_team");
        assert_eq!(label_column_name("cost center"), "label_cost_center");
        assert_eq!(label_column_name("a::b"), "label_a_b");
    }
}

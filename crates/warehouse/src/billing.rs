use std::collections::BTreeSet;

use billsync_core::{
    ColumnMapping, CurrencyContext, ExtraColumn, JobContext, MonthWindow, ReportPath,
};

use crate::query::{ColumnExpr, ReplaceWindow, sql_str};

/// Source columns projected into the unified table whenever the export file
/// carries them; each becomes an `azure<Name>` column.
pub const OPTIONAL_COLUMNS: &[&str] = &[
    "AccountName",
    "Frequency",
    "PublisherType",
    "ServiceTier",
    "ResourceType",
    "SubscriptionName",
    "ReservationId",
    "ReservationName",
    "PublisherName",
    "CustomerName",
    "BillingCurrency",
];

// Older Azure export versions write start times as MM/DD/YYYY; newer ones
// are ISO. Branch on the date shape before parsing.
fn start_time_expr(column: &str) -> String {
    format!(
        "if(match(toString({column}), '^(0[1-9]|1[0-2])/(0[1-9]|[12][0-9]|3[01])/[0-9]{{4}}$'), \
         parseDateTime(toString({column}), '%m/%d/%Y', 'UTC'), \
         parseDateTimeBestEffort(toString({column})))"
    )
}

fn fx_multiplier(currency: Option<&CurrencyContext>) -> String {
    currency
        .map(|context| format!(" * {}", context.fx_rate_src_to_dest))
        .unwrap_or_default()
}

fn fx_rate_expr(currency: Option<&CurrencyContext>) -> String {
    currency
        .map(|context| context.fx_rate_src_to_dest.to_string())
        .unwrap_or_else(|| "CAST(NULL AS Nullable(Float64))".to_string())
}

fn preferred_currency_expr(currency: Option<&CurrencyContext>) -> String {
    currency
        .map(|context| sql_str(&context.preferred_currency))
        .unwrap_or_else(|| "CAST(NULL AS Nullable(String))".to_string())
}

// Tail of the resource path after the last (case-insensitive) `providers/`
// marker, e.g. `Microsoft.Compute/virtualMachines/vm-1`.
fn azure_resource_expr(instance: &str) -> String {
    format!(
        "if(match({instance}, '(?i)providers/'), \
         arrayElement(arrayReverse(splitByString(extract(assumeNotNull({instance}), '(?i)providers/'), \
         assumeNotNull({instance}))), 1), NULL)"
    )
}

// Scale-set members carry the member index in AdditionalInfo.VMName
// (`<set>_<N>`); the synthetic URI points at the member VM, not the set.
fn vm_provider_id_expr(instance: &str) -> String {
    format!(
        "multiIf(match({instance}, 'virtualMachineScaleSets'), \
         lower(concat('azure://', {instance}, '/virtualMachines/', \
         extract(JSONExtractString(additionalinfo, 'VMName'), '_([0-9]+)$'))), \
         match({instance}, 'virtualMachines'), \
         lower(concat('azure://', {instance})), \
         NULL)"
    )
}

// Tags arrive either as a full JSON object or as a brace-less key/value
// list depending on the export format.
fn labels_expr() -> String {
    "JSONExtract(if(startsWith(ifNull(tags, ''), '{'), ifNull(tags, ''), \
     concat('{', ifNull(tags, ''), '}')), 'Map(String, String)')"
        .to_string()
}

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|value| sql_str(value))
        .collect::<Vec<_>>()
        .join(", ")
}

fn subscription_scope(subscription_ids: &[String]) -> String {
    format!("azureSubscriptionGuid IN ({})", quoted_list(subscription_ids))
}

/// Replace-window for the low-cardinality rollup: one row per (service,
/// region, subscription, start time) with `min(rate)` and `sum(cost)`.
pub fn preaggregated_replace(
    report: &ReportPath,
    mapping: &ColumnMapping,
    window: &MonthWindow,
    subscription_ids: &[String],
    job: &JobContext,
) -> ReplaceWindow {
    let currency = job.currency.as_ref();
    let fx = fx_multiplier(currency);
    let columns = vec![
        ColumnExpr::new("startTime", start_time_expr(&mapping.start_time)),
        ColumnExpr::new(
            "azureResourceRate",
            format!("min({}{fx})", mapping.resource_rate),
        ),
        ColumnExpr::new("cost", format!("sum({}{fx})", mapping.cost)),
        ColumnExpr::new("azureServiceName", "metercategory"),
        ColumnExpr::new("region", "resourcelocation"),
        ColumnExpr::new("azureSubscriptionGuid", mapping.subscription_guid.clone()),
        ColumnExpr::new("cloudProvider", "'AZURE'"),
        ColumnExpr::new("azureTenantId", sql_str(&report.tenant_id)),
        ColumnExpr::new("fxRateSrcToDest", fx_rate_expr(currency)),
        ColumnExpr::new("ccmPreferredCurrency", preferred_currency_expr(currency)),
    ];
    ReplaceWindow {
        target: "ccm.preAggregated".to_string(),
        time_column: "startTime".to_string(),
        window: window.clone(),
        scope: vec![
            "cloudProvider = 'AZURE'".to_string(),
            subscription_scope(subscription_ids),
        ],
        columns,
        source: format!("ccm.{}", report.staging_table()),
        source_filter: Some(format!(
            "{} IN ({})",
            mapping.subscription_guid,
            quoted_list(subscription_ids)
        )),
        group_by: vec![
            "azureServiceName".to_string(),
            "region".to_string(),
            "azureSubscriptionGuid".to_string(),
            "startTime".to_string(),
        ],
    }
}

/// Replace-window for the fully normalized unified rows: one output row per
/// staged row, with markup and currency conversion applied and the resource
/// identifiers derived. Optional columns are projected only when the
/// introspected schema carries them.
pub fn unified_replace(
    report: &ReportPath,
    mapping: &ColumnMapping,
    window: &MonthWindow,
    subscription_ids: &[String],
    job: &JobContext,
    markup_factor: f64,
    available_columns: &BTreeSet<String>,
    extra_columns: &[ExtraColumn],
) -> ReplaceWindow {
    let currency = job.currency.as_ref();
    let fx = fx_multiplier(currency);
    let instance = mapping.instance_id.as_str();
    let mut columns = vec![
        ColumnExpr::new("product", "metercategory"),
        ColumnExpr::new("startTime", start_time_expr(&mapping.start_time)),
        ColumnExpr::new(
            "cost",
            format!("({} * {markup_factor}{fx})", mapping.cost),
        ),
        ColumnExpr::new("azureMeterCategory", "metercategory"),
        ColumnExpr::new("azureMeterSubcategory", "metersubcategory"),
        ColumnExpr::new("azureMeterId", "meterid"),
        ColumnExpr::new("azureMeterName", "metername"),
        ColumnExpr::new("azureInstanceId", instance),
        ColumnExpr::new("region", "resourcelocation"),
        ColumnExpr::new("azureResourceGroup", mapping.resource_group.clone()),
        ColumnExpr::new("azureSubscriptionGuid", mapping.subscription_guid.clone()),
        ColumnExpr::new("azureServiceName", "metercategory"),
        ColumnExpr::new("cloudProvider", "'AZURE'"),
        ColumnExpr::new("labels", labels_expr()),
        ColumnExpr::new("azureResource", azure_resource_expr(instance)),
        ColumnExpr::new("azureVMProviderId", vm_provider_id_expr(instance)),
        ColumnExpr::new("azureTenantId", sql_str(&report.tenant_id)),
        ColumnExpr::new(
            "azureResourceRate",
            format!("({}{fx})", mapping.resource_rate),
        ),
        ColumnExpr::new("fxRateSrcToDest", fx_rate_expr(currency)),
        ColumnExpr::new("ccmPreferredCurrency", preferred_currency_expr(currency)),
    ];
    columns.extend(optional_projection(available_columns));
    columns.extend(extra_projection(extra_columns, available_columns));
    ReplaceWindow {
        target: "ccm.unifiedTable".to_string(),
        time_column: "startTime".to_string(),
        window: window.clone(),
        scope: vec![
            "cloudProvider = 'AZURE'".to_string(),
            subscription_scope(subscription_ids),
        ],
        columns,
        source: format!("ccm.{}", report.staging_table()),
        source_filter: Some(format!(
            "{} IN ({})",
            mapping.subscription_guid,
            quoted_list(subscription_ids)
        )),
        group_by: Vec::new(),
    }
}

fn optional_projection(available_columns: &BTreeSet<String>) -> Vec<ColumnExpr> {
    OPTIONAL_COLUMNS
        .iter()
        .filter(|name| available_columns.contains(&name.to_lowercase()))
        .map(|name| ColumnExpr::new(format!("azure{name}"), name.to_lowercase()))
        .collect()
}

fn extra_projection(
    extra_columns: &[ExtraColumn],
    available_columns: &BTreeSet<String>,
) -> Vec<ColumnExpr> {
    extra_columns
        .iter()
        .filter(|extra| available_columns.contains(&extra.name.to_lowercase()))
        .map(|extra| {
            let source = extra.name.to_lowercase();
            let expr = if extra.cast_to_int {
                // Schema-on-read can type these columns inconsistently
                // across files; normalize to an integer.
                format!("toInt64OrNull(toString({source}))")
            } else {
                source
            };
            ColumnExpr::new(format!("azure{}", extra.name), expr)
        })
        .collect()
}

/// DDL adding the per-account extra columns to the unified table before
/// they are first projected. `IF NOT EXISTS` keeps reruns safe.
pub fn extra_column_ddl(
    extra_columns: &[ExtraColumn],
    available_columns: &BTreeSet<String>,
) -> Vec<String> {
    extra_columns
        .iter()
        .filter(|extra| available_columns.contains(&extra.name.to_lowercase()))
        .map(|extra| {
            let kind = if extra.cast_to_int {
                "Nullable(Int64)"
            } else {
                "Nullable(String)"
            };
            format!(
                "ALTER TABLE ccm.unifiedTable ADD COLUMN IF NOT EXISTS `azure{}` {kind}",
                extra.name
            )
        })
        .collect()
}

/// Replace-window for the day-granularity totals read off the unified
/// table. Runs only when cost aggregation is enabled for the job.
pub fn cost_aggregated_replace(report: &ReportPath, window: &MonthWindow) -> ReplaceWindow {
    let columns = vec![
        ColumnExpr::new("day", "toStartOfDay(startTime)"),
        ColumnExpr::new("cost", "sum(cost)"),
        ColumnExpr::new("cloudProvider", "'AZURE'"),
        ColumnExpr::new("accountId", sql_str(&report.account_id)),
    ];
    ReplaceWindow {
        target: "ccm.costAggregated".to_string(),
        time_column: "day".to_string(),
        window: window.clone(),
        scope: vec![
            "cloudProvider = 'AZURE'".to_string(),
            format!("accountId = {}", sql_str(&report.account_id)),
        ],
        columns,
        source: "ccm.unifiedTable".to_string(),
        source_filter: Some(format!(
            "toDate(startTime) >= '{}' AND toDate(startTime) <= '{}' AND cloudProvider = 'AZURE'",
            window.date_start, window.date_end
        )),
        group_by: vec!["day".to_string()],
    }
}

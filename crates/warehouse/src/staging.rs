use billsync_core::{ColumnMapping, ReportPath};
use log::info;

use crate::client::QuerySettings;
use crate::error::Result;
use crate::query::AzureBlobSource;
use crate::Warehouse;

// Raised memory ceiling for the raw bulk load; export files for large
// tenants run to millions of rows.
const LOAD_MAX_MEMORY_USAGE: u64 = 1_000_000_000_000;

/// Drop and recreate the staging table for one report, then bulk-load the
/// raw export into it straight from object storage. The table is ordered by
/// the mapped start-time column so the window-scoped reads that follow stay
/// cheap. Reruns for the same (year, month, connector) fully replace any
/// previously staged rows.
pub fn replace_staging_table(
    store: &dyn Warehouse,
    report: &ReportPath,
    column_definitions: &str,
    mapping: &ColumnMapping,
    source: &AzureBlobSource,
) -> Result<String> {
    let table = format!("ccm.{}", report.staging_table());

    store.command(&format!("DROP TABLE IF EXISTS {table}"))?;
    info!("dropped staging table {table}");

    let create = format!(
        "CREATE TABLE IF NOT EXISTS {table}\n(\n    {column_definitions}\n)\n\
         ENGINE = MergeTree\nORDER BY tuple({order})\nSETTINGS allow_nullable_key = 1",
        order = mapping.start_time
    );
    store.command(&create)?;
    info!("created empty staging table {table}");

    let load = format!("INSERT INTO {table}\nSELECT * FROM {}", source.table_function());
    let settings = QuerySettings {
        input_format_csv_skip_first_lines: Some(1),
        max_memory_usage: Some(LOAD_MAX_MEMORY_USAGE),
        ..QuerySettings::default()
    };
    store.command_with_settings(&load, &settings)?;
    info!("loaded raw rows into {table}");

    Ok(table)
}

/// Distinct subscription ids present in the staged rows; the aggregation
/// windows are scoped to exactly this set.
pub fn distinct_subscription_ids(
    store: &dyn Warehouse,
    table: &str,
    mapping: &ColumnMapping,
) -> Result<Vec<String>> {
    let rows = store.query(&format!(
        "SELECT DISTINCT {} FROM {table}",
        mapping.subscription_guid
    ))?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter(|id| !id.is_empty())
        .collect())
}

use std::time::Duration;

use backon::{BlockingRetryable, ConstantBuilder};
use billsync_core::{
    JobContext, MarkupConfig, ReportPath, cost_markup_factor, month_window,
    resolve_column_mapping,
};
use billsync_warehouse::{
    AzureBlobSource, QuerySettings, Warehouse, bootstrap, cost_aggregated_replace,
    distinct_subscription_ids, extra_column_ddl, flatten_label_keys, preaggregated_replace,
    record_sync_success, replace_staging_table, unified_replace,
};
use chrono::{Duration as ChronoDuration, Utc};
use log::{error, info, warn};

use crate::blobs::BlobLister;
use crate::discovery::discover_reports;
use crate::schema::introspect;
use crate::types::{IngestError, IngestIssue, IngestStats, Result};

const UNIFIED_INSERT_ATTEMPTS: usize = 3;
const UNIFIED_RETRY_DELAY: Duration = Duration::from_secs(2);

// Cost aggregation reads the whole month back out of the unified table, so
// it runs at batch priority with a hard execution ceiling.
const COST_AGG_TIMEOUT_SECS: u64 = 180;
const BATCH_QUERY_PRIORITY: u64 = 10;

/// Everything one sync run needs beyond the two I/O seams: storage
/// coordinates for the staging loads, injected markup configuration, and
/// the per-run job context.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub connection_string: String,
    pub container: String,
    pub lookback_days: i64,
    pub markup: MarkupConfig,
    pub job: JobContext,
    pub enable_cost_aggregation: bool,
}

/// Run one scheduled sync: bootstrap the shared tables, discover reports
/// modified inside the lookback window, and process each in turn. A report
/// failure is recorded and skipped; discovery or bootstrap failures abort
/// the run.
pub fn run_sync(
    store: &dyn Warehouse,
    lister: &dyn BlobLister,
    context: &SyncContext,
) -> Result<IngestStats> {
    bootstrap(store)?;

    let blobs = lister.list_blobs()?;
    let cutoff = Utc::now() - ChronoDuration::days(context.lookback_days);
    let paths = discover_reports(&blobs, cutoff);

    let mut stats = IngestStats {
        reports_discovered: paths.len(),
        ..IngestStats::default()
    };
    if paths.is_empty() {
        info!("no reports to ingest");
        return Ok(stats);
    }

    for path in &paths {
        match process_report(store, context, path) {
            Ok(()) => stats.reports_ingested += 1,
            Err(err) => {
                error!("failed to ingest report {path}: {err}");
                stats.reports_failed += 1;
                stats.issues.push(IngestIssue {
                    path: path.clone(),
                    message: err.to_string(),
                });
            }
        }
    }
    Ok(stats)
}

fn process_report(store: &dyn Warehouse, context: &SyncContext, path: &str) -> Result<()> {
    let report = ReportPath::parse(path)
        .ok_or_else(|| IngestError::Report(format!("unrecognized report path layout: {path}")))?;
    let window = month_window(&report.report_year, &report.report_month).ok_or_else(|| {
        IngestError::Report(format!(
            "invalid report month {}-{} in {path}",
            report.report_year, report.report_month
        ))
    })?;
    info!(
        "ingesting report {path} (account {}, connector {})",
        report.account_id, report.connector_id
    );

    let source = AzureBlobSource {
        connection_string: context.connection_string.clone(),
        container: context.container.clone(),
        path: path.to_string(),
    };
    let schema = introspect(store, &source)?;
    let mapping = resolve_column_mapping(&schema.columns)?;
    info!("resolved column mapping: {mapping:?}");

    let staging = replace_staging_table(store, &report, &schema.definition, &mapping, &source)?;

    let subscription_ids = distinct_subscription_ids(store, &staging, &mapping)?;
    if subscription_ids.is_empty() {
        warn!("{staging} holds no subscription ids; nothing to aggregate for {path}");
        record_sync_success(store, &report.account_id, &report.connector_id)?;
        return Ok(());
    }
    info!("found {} distinct subscription ids", subscription_ids.len());

    let preagg = preaggregated_replace(&report, &mapping, &window, &subscription_ids, &context.job);
    preagg.apply(store).inspect_err(|_| {
        error!(
            "preaggregated load failed for {path}; query was:\n{}",
            preagg.insert_sql()
        );
    })?;
    info!("loaded ccm.preAggregated from {staging}");

    let markup_factor = cost_markup_factor(
        &context.markup,
        &report.account_id,
        context.job.cost_markup_override,
    );
    let extra_columns = context.markup.extra_columns(&report.account_id);
    for ddl in extra_column_ddl(extra_columns, &schema.columns) {
        store.command(&ddl)?;
    }
    let unified = unified_replace(
        &report,
        &mapping,
        &window,
        &subscription_ids,
        &context.job,
        markup_factor,
        &schema.columns,
        extra_columns,
    );
    store.command(&unified.delete_sql())?;
    let insert_sql = unified.insert_sql();
    let insert = || store.command(&insert_sql);
    insert
        .retry(
            ConstantBuilder::default()
                .with_delay(UNIFIED_RETRY_DELAY)
                .with_max_times(UNIFIED_INSERT_ATTEMPTS - 1),
        )
        .notify(|err, delay| {
            warn!("unified insert failed, retrying in {delay:?}: {err}");
        })
        .call()
        .map_err(|err| {
            error!(
                "unified insert failed after {UNIFIED_INSERT_ATTEMPTS} attempts for {path}; \
                 query was:\n{insert_sql}"
            );
            err
        })?;
    info!("loaded ccm.unifiedTable from {staging}");

    flatten_label_keys(store, "ccm.unifiedTable", &unified.window_filter())?;

    if context.enable_cost_aggregation {
        let cost_agg = cost_aggregated_replace(&report, &window);
        store.command(&cost_agg.delete_sql())?;
        let settings = QuerySettings {
            max_execution_time: Some(COST_AGG_TIMEOUT_SECS),
            priority: Some(BATCH_QUERY_PRIORITY),
            ..QuerySettings::default()
        };
        store
            .command_with_settings(&cost_agg.insert_sql(), &settings)
            .inspect_err(|_| {
                error!(
                    "cost aggregation failed for {path}; query was:\n{}",
                    cost_agg.insert_sql()
                );
            })?;
        info!("loaded ccm.costAggregated for account {}", report.account_id);
    }

    record_sync_success(store, &report.account_id, &report.connector_id)?;
    Ok(())
}

mod config;

use std::process::ExitCode;

use billsync_warehouse::ClickhouseClient;
use ingest::{AzureBlobLister, SyncContext, run_sync};
use log::{error, info};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let store = match ClickhouseClient::new(
        &config.clickhouse_host,
        config.clickhouse_port,
        &config.clickhouse_username,
        &config.clickhouse_password,
    ) {
        Ok(store) => store,
        Err(err) => {
            error!("failed to build clickhouse client: {err}");
            return ExitCode::FAILURE;
        }
    };
    let lister = match AzureBlobLister::new(
        &config.storage_account,
        &config.container,
        &config.sas_token,
    ) {
        Ok(lister) => lister,
        Err(err) => {
            error!("failed to build blob lister: {err}");
            return ExitCode::FAILURE;
        }
    };

    let context = SyncContext {
        connection_string: config.connection_string(),
        container: config.container.clone(),
        lookback_days: config.lookback_days,
        markup: config.markup.clone(),
        job: config.job.clone(),
        enable_cost_aggregation: config.enable_cost_aggregation,
    };

    match run_sync(&store, &lister, &context) {
        Ok(stats) => {
            info!(
                "sync finished: {} reports discovered, {} ingested, {} failed",
                stats.reports_discovered, stats.reports_ingested, stats.reports_failed
            );
            for issue in &stats.issues {
                error!("report {}: {}", issue.path, issue.message);
            }
            if stats.reports_failed > 0 {
                ExitCode::FAILURE
            } else {
                info!("scheduled job executed successfully");
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            error!("sync aborted: {err}");
            ExitCode::FAILURE
        }
    }
}

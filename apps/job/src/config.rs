use std::env;
use std::fs;

use billsync_core::{CurrencyContext, JobContext, MarkupConfig};

const DEFAULT_CLICKHOUSE_HOST: &str = "localhost";
const DEFAULT_CLICKHOUSE_PORT: u16 = 8123;
const DEFAULT_CLICKHOUSE_USERNAME: &str = "default";
const DEFAULT_STORAGE_ACCOUNT: &str = "ccmcustomerbillingdata";
const DEFAULT_CONTAINER: &str = "billingdatacontainer";
const DEFAULT_LOOKBACK_DAYS: i64 = 1;

/// Job configuration, read entirely from the environment; the job runs on a
/// schedule and takes no CLI flags.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub clickhouse_host: String,
    pub clickhouse_port: u16,
    pub clickhouse_username: String,
    pub clickhouse_password: String,
    pub storage_account: String,
    pub container: String,
    pub sas_token: String,
    pub lookback_days: i64,
    pub markup: MarkupConfig,
    pub job: JobContext,
    pub enable_cost_aggregation: bool,
}

impl JobConfig {
    /// The connection string handed both to the blob lister and, verbatim,
    /// to the `azureBlobStorage` table functions.
    pub fn connection_string(&self) -> String {
        format!(
            "BlobEndpoint=https://{}.blob.core.windows.net;SharedAccessSignature={}",
            self.storage_account, self.sas_token
        )
    }
}

pub fn from_env() -> Result<JobConfig, String> {
    let clickhouse_host =
        env::var("CLICKHOUSE_URL").unwrap_or_else(|_| DEFAULT_CLICKHOUSE_HOST.to_string());
    let clickhouse_port = match env::var("CLICKHOUSE_PORT") {
        Ok(value) => value
            .parse::<u16>()
            .map_err(|err| format!("parse CLICKHOUSE_PORT {value:?}: {err}"))?,
        Err(_) => DEFAULT_CLICKHOUSE_PORT,
    };
    let clickhouse_username =
        env::var("CLICKHOUSE_USERNAME").unwrap_or_else(|_| DEFAULT_CLICKHOUSE_USERNAME.to_string());
    let clickhouse_password = env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    let storage_account =
        env::var("AZURE_STORAGE_ACCOUNT").unwrap_or_else(|_| DEFAULT_STORAGE_ACCOUNT.to_string());
    let container = env::var("AZURE_CONTAINER").unwrap_or_else(|_| DEFAULT_CONTAINER.to_string());
    let sas_token =
        env::var("AZURE_SAS_TOKEN").map_err(|_| "AZURE_SAS_TOKEN is required".to_string())?;

    let lookback_days = match env::var("TIME_DELTA") {
        Ok(value) => value
            .parse::<i64>()
            .map_err(|err| format!("parse TIME_DELTA {value:?}: {err}"))?,
        Err(_) => DEFAULT_LOOKBACK_DAYS,
    };

    let markup = match env::var("MARKUP_CONFIG") {
        Ok(path) => {
            let contents =
                fs::read_to_string(&path).map_err(|err| format!("read {path}: {err}"))?;
            toml::from_str::<MarkupConfig>(&contents)
                .map_err(|err| format!("parse {path}: {err}"))?
        }
        Err(_) => MarkupConfig::default(),
    };

    let cost_markup_override = match env::var("COST_MARKUP") {
        Ok(value) => Some(
            value
                .parse::<f64>()
                .map_err(|err| format!("parse COST_MARKUP {value:?}: {err}"))?,
        ),
        Err(_) => None,
    };

    let currency = match (
        env::var("CCM_PREFERRED_CURRENCY"),
        env::var("FX_RATE_SRC_TO_DEST"),
    ) {
        (Ok(preferred_currency), Ok(rate)) => Some(CurrencyContext {
            preferred_currency,
            fx_rate_src_to_dest: rate
                .parse::<f64>()
                .map_err(|err| format!("parse FX_RATE_SRC_TO_DEST {rate:?}: {err}"))?,
        }),
        (Err(_), Err(_)) => None,
        _ => {
            return Err(
                "CCM_PREFERRED_CURRENCY and FX_RATE_SRC_TO_DEST must be set together".to_string(),
            );
        }
    };

    let enable_cost_aggregation = matches!(
        env::var("ENABLE_COST_AGGREGATION").as_deref(),
        Ok("1") | Ok("true")
    );

    Ok(JobConfig {
        clickhouse_host,
        clickhouse_port,
        clickhouse_username,
        clickhouse_password,
        storage_account,
        container,
        sas_token,
        lookback_days,
        markup,
        job: JobContext {
            cost_markup_override,
            currency,
        },
        enable_cost_aggregation,
    })
}

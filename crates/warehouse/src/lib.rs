mod billing;
mod client;
mod error;
mod labels;
mod query;
mod schema;
mod staging;
mod sync_status;

pub use billing::{
    OPTIONAL_COLUMNS, cost_aggregated_replace, extra_column_ddl, preaggregated_replace,
    unified_replace,
};
pub use client::{ClickhouseClient, QuerySettings};
pub use error::{Result, WarehouseError};
pub use labels::flatten_label_keys;
pub use query::{AzureBlobSource, ColumnExpr, ReplaceWindow, sql_str};
pub use schema::{BOOTSTRAP, bootstrap};
pub use staging::{distinct_subscription_ids, replace_staging_table};
pub use sync_status::record_sync_success;

/// Execution seam over the analytics store. The production implementation is
/// [`ClickhouseClient`]; tests script a fake so SQL generation and pipeline
/// flow can be exercised without a live warehouse.
pub trait Warehouse {
    /// Run a DDL/DML statement that produces no result set.
    fn command_with_settings(&self, sql: &str, settings: &QuerySettings) -> Result<()>;

    /// Run a query and return its rows as tab-separated fields.
    fn query(&self, sql: &str) -> Result<Vec<Vec<String>>>;

    fn command(&self, sql: &str) -> Result<()> {
        self.command_with_settings(sql, &QuerySettings::default())
    }
}

use log::{debug, info};

use crate::error::Result;
use crate::Warehouse;

const DDL_0001: &str = include_str!("../ddl/0001_create_database.sql");
const DDL_0002: &str = include_str!("../ddl/0002_unified_table.sql");
const DDL_0003: &str = include_str!("../ddl/0003_pre_aggregated.sql");
const DDL_0004: &str = include_str!("../ddl/0004_cost_aggregated.sql");
const DDL_0005: &str = include_str!("../ddl/0005_connector_sync_status.sql");

pub const BOOTSTRAP: &[(&str, &str)] = &[
    ("0001_create_database", DDL_0001),
    ("0002_unified_table", DDL_0002),
    ("0003_pre_aggregated", DDL_0003),
    ("0004_cost_aggregated", DDL_0004),
    ("0005_connector_sync_status", DDL_0005),
];

/// Ensure the ccm database and the shared analytic tables exist. Every
/// statement is `IF NOT EXISTS`; a failure here is fatal to the whole run.
pub fn bootstrap(store: &dyn Warehouse) -> Result<()> {
    for (name, sql) in BOOTSTRAP {
        store.command(sql)?;
        debug!("applied bootstrap statement {name}");
    }
    info!("ccm database and shared tables are ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_statements_are_idempotent_ddl() {
        for (name, sql) in BOOTSTRAP {
            assert!(
                sql.starts_with("CREATE DATABASE IF NOT EXISTS")
                    || sql.starts_with("CREATE TABLE IF NOT EXISTS"),
                "{name} is not idempotent DDL"
            );
        }
    }
}

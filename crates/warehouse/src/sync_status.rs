use log::info;

use crate::error::Result;
use crate::query::sql_str;
use crate::Warehouse;

const JOB_TYPE: &str = "cloudfunction";
const CLOUD_PROVIDER: &str = "AZURE";

/// Overwrite the sync heartbeat for one (account, connector) pair. Called
/// only after every prior stage for the report succeeded, so a stale
/// timestamp is a reliable signal of a failing connector.
pub fn record_sync_success(
    store: &dyn Warehouse,
    account_id: &str,
    connector_id: &str,
) -> Result<()> {
    store.command(&format!(
        "DELETE FROM ccm.connectorDataSyncStatus WHERE accountId = {} AND connectorId = {}",
        sql_str(account_id),
        sql_str(connector_id)
    ))?;
    store.command(&format!(
        "INSERT INTO ccm.connectorDataSyncStatus \
         (accountId, connectorId, jobType, cloudProviderId, lastSuccessfullExecutionAt) \
         VALUES ({}, {}, {}, {}, now())",
        sql_str(account_id),
        sql_str(connector_id),
        sql_str(JOB_TYPE),
        sql_str(CLOUD_PROVIDER)
    ))?;
    info!("recorded sync success for account {account_id} connector {connector_id}");
    Ok(())
}

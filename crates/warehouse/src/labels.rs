use billsync_core::label_column_name;
use log::info;

use crate::error::Result;
use crate::query::sql_str;
use crate::Warehouse;

/// Flatten every label key present in the freshly written window into a
/// first-class nullable column, so new provider tag keys become queryable
/// without schema releases. Scoped by the same filter the window insert
/// used; rows outside it are untouched.
pub fn flatten_label_keys(store: &dyn Warehouse, table: &str, filter: &str) -> Result<usize> {
    let rows = store.query(&format!(
        "SELECT DISTINCT arrayJoin(mapKeys(labels)) FROM {table} WHERE {filter}"
    ))?;
    let mut flattened = 0usize;
    for row in rows {
        let Some(key) = row.into_iter().next() else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        let column = label_column_name(&key);
        store.command(&format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS `{column}` Nullable(String)"
        ))?;
        store.command(&format!(
            "ALTER TABLE {table} UPDATE `{column}` = labels[{}] WHERE {filter}",
            sql_str(&key)
        ))?;
        flattened += 1;
    }
    info!("flattened {flattened} label keys in {table}");
    Ok(flattened)
}

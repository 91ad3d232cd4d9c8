use std::collections::BTreeSet;

use billsync_warehouse::{AzureBlobSource, Warehouse};
use log::{debug, error};

use crate::types::Result;

/// Column set and SQL-ready column definitions of one export file, as seen
/// by the engine's schema-on-read inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectedSchema {
    pub columns: BTreeSet<String>,
    pub definition: String,
}

/// Describe the raw file in place. The column set drives mapping and
/// optional projection; the definition string becomes the staging DDL.
pub fn introspect(store: &dyn Warehouse, source: &AzureBlobSource) -> Result<IntrospectedSchema> {
    let sql = format!(
        "DESCRIBE TABLE (SELECT * FROM {})",
        source.table_function()
    );
    debug!("introspecting export schema: {sql}");
    let rows = store.query(&sql).inspect_err(|err| {
        error!("failed to introspect schema for {}: {err}", source.path);
    })?;
    let mut columns = BTreeSet::new();
    let mut definitions = Vec::with_capacity(rows.len());
    for row in &rows {
        let Some(name) = row.first() else {
            continue;
        };
        let name = name.to_lowercase();
        let kind = normalize_type(row.get(1).map(String::as_str).unwrap_or(""));
        definitions.push(format!("{name} {kind}"));
        columns.insert(name);
    }
    let definition = definitions.join(", ");
    debug!("introspected schema: {definition}");
    Ok(IntrospectedSchema {
        columns,
        definition,
    })
}

// Schema-on-read reports every CSV column wrapped in Nullable(...); the
// staging table keeps the inner type. Anything else falls back to string.
fn normalize_type(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    match lower
        .strip_prefix("nullable(")
        .and_then(|inner| inner.strip_suffix(')'))
    {
        Some(inner) => inner.to_string(),
        None => "string".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullable_wrapper_is_stripped() {
        assert_eq!(normalize_type("Nullable(String)"), "string");
        assert_eq!(normalize_type("Nullable(Float64)"), "float64");
        assert_eq!(normalize_type("Nullable(DateTime64(9))"), "datetime64(9)");
    }

    #[test]
    fn unwrapped_types_default_to_string() {
        assert_eq!(normalize_type("Float64"), "string");
        assert_eq!(normalize_type(""), "string");
    }
}

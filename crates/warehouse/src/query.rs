use billsync_core::MonthWindow;
use log::debug;

use crate::error::Result;
use crate::Warehouse;

/// Render a string as a single-quoted SQL literal.
pub fn sql_str(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('\'');
    quoted
}

/// A blob-backed table function argument set: the same connection string the
/// lister uses, plus the container and the (possibly wildcard) path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureBlobSource {
    pub connection_string: String,
    pub container: String,
    pub path: String,
}

impl AzureBlobSource {
    pub fn table_function(&self) -> String {
        format!(
            "azureBlobStorage({}, {}, {})",
            sql_str(&self.connection_string),
            sql_str(&self.container),
            sql_str(&self.path)
        )
    }
}

/// One projected column of an insert-select: the target column name and the
/// select expression that feeds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnExpr {
    pub column: String,
    pub expr: String,
}

impl ColumnExpr {
    pub fn new(column: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            expr: expr.into(),
        }
    }
}

/// A delete-then-insert pair scoped to a date window. Deleting the window
/// first makes the insert an idempotent replace, so reruns over the same
/// (window, scope) key are safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceWindow {
    pub target: String,
    pub time_column: String,
    pub window: MonthWindow,
    pub scope: Vec<String>,
    pub columns: Vec<ColumnExpr>,
    pub source: String,
    pub source_filter: Option<String>,
    pub group_by: Vec<String>,
}

impl ReplaceWindow {
    /// The predicate identifying the rows this replace owns; also used to
    /// scope follow-up work (label flattening) to the freshly written slice.
    pub fn window_filter(&self) -> String {
        let mut filter = format!(
            "toDate({col}) >= '{start}' AND toDate({col}) <= '{end}'",
            col = self.time_column,
            start = self.window.date_start,
            end = self.window.date_end
        );
        for predicate in &self.scope {
            filter.push_str(" AND ");
            filter.push_str(predicate);
        }
        filter
    }

    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE {}", self.target, self.window_filter())
    }

    pub fn insert_sql(&self) -> String {
        let columns: Vec<&str> = self
            .columns
            .iter()
            .map(|column| column.column.as_str())
            .collect();
        let selects: Vec<String> = self
            .columns
            .iter()
            .map(|column| format!("{} AS {}", column.expr, column.column))
            .collect();
        let mut sql = format!(
            "INSERT INTO {} ({})\nSELECT {}\nFROM {}",
            self.target,
            columns.join(", "),
            selects.join(",\n       "),
            self.source
        );
        if let Some(filter) = &self.source_filter {
            sql.push_str("\nWHERE ");
            sql.push_str(filter);
        }
        if !self.group_by.is_empty() {
            sql.push_str("\nGROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        sql
    }

    pub fn apply(&self, store: &dyn Warehouse) -> Result<()> {
        debug!("replace window on {}: {}", self.target, self.window_filter());
        store.command(&self.delete_sql())?;
        store.command(&self.insert_sql())?;
        Ok(())
    }
}

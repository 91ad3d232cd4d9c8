use log::debug;
use reqwest::blocking::Client;

use crate::error::{Result, WarehouseError};
use crate::Warehouse;

/// Per-query ClickHouse settings, sent as HTTP query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySettings {
    pub input_format_csv_skip_first_lines: Option<u64>,
    pub max_memory_usage: Option<u64>,
    pub max_execution_time: Option<u64>,
    pub priority: Option<u64>,
}

impl QuerySettings {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(value) = self.input_format_csv_skip_first_lines {
            params.push(("input_format_csv_skip_first_lines", value.to_string()));
        }
        if let Some(value) = self.max_memory_usage {
            params.push(("max_memory_usage", value.to_string()));
        }
        if let Some(value) = self.max_execution_time {
            params.push(("max_execution_time", value.to_string()));
        }
        if let Some(value) = self.priority {
            params.push(("priority", value.to_string()));
        }
        params
    }
}

/// Blocking client for the ClickHouse HTTP interface.
pub struct ClickhouseClient {
    http: Client,
    endpoint: String,
    username: String,
    password: String,
}

impl ClickhouseClient {
    /// Bulk loads and window rewrites can run long, so the client carries no
    /// transport timeout; the cost-aggregation query bounds itself with
    /// `max_execution_time` server-side.
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Result<Self> {
        let http = Client::builder().timeout(None).build()?;
        Ok(Self {
            http,
            endpoint: format!("http://{host}:{port}/"),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    fn execute(&self, sql: &str, params: &[(&'static str, String)]) -> Result<String> {
        debug!("clickhouse: {sql}");
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .query(params)
            .body(sql.to_string())
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(WarehouseError::Server {
                status: status.as_u16(),
                body: body.trim_end().to_string(),
            });
        }
        Ok(body)
    }
}

impl Warehouse for ClickhouseClient {
    fn command_with_settings(&self, sql: &str, settings: &QuerySettings) -> Result<()> {
        self.execute(sql, &settings.params())?;
        Ok(())
    }

    fn query(&self, sql: &str) -> Result<Vec<Vec<String>>> {
        let mut params = QuerySettings::default().params();
        params.push(("default_format", "TabSeparated".to_string()));
        let body = self.execute(sql, &params)?;
        Ok(body
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| line.split('\t').map(unescape_tsv).collect())
            .collect())
    }
}

// TabSeparated output escapes control characters and backslashes.
fn unescape_tsv(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('0') => out.push('\0'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

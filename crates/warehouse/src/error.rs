#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("clickhouse returned status {status}: {body}")]
    Server { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, WarehouseError>;

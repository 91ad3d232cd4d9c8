use billsync_core::MappingError;
use billsync_warehouse::WarehouseError;

/// Summary returned after one sync run across all discovered reports.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub reports_discovered: usize,
    pub reports_ingested: usize,
    pub reports_failed: usize,
    pub issues: Vec<IngestIssue>,
}

/// Per-report failure kept for the run summary; the run itself continues.
#[derive(Debug, Clone)]
pub struct IngestIssue {
    pub path: String,
    pub message: String,
}

/// Errors emitted by the sync pipeline.
#[derive(Debug)]
pub enum IngestError {
    Warehouse(WarehouseError),
    Mapping(MappingError),
    Listing(String),
    Report(String),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warehouse(err) => write!(f, "warehouse error: {}", err),
            Self::Mapping(err) => write!(f, "{}", err),
            Self::Listing(message) => write!(f, "blob listing error: {}", message),
            Self::Report(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<WarehouseError> for IngestError {
    fn from(err: WarehouseError) -> Self {
        Self::Warehouse(err)
    }
}

impl From<MappingError> for IngestError {
    fn from(err: MappingError) -> Self {
        Self::Mapping(err)
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

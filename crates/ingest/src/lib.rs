mod blobs;
mod discovery;
mod pipeline;
mod schema;
mod types;

pub use blobs::{AzureBlobLister, BlobLister, BlobMeta};
pub use discovery::discover_reports;
pub use pipeline::{SyncContext, run_sync};
pub use schema::{IntrospectedSchema, introspect};
pub use types::{IngestError, IngestIssue, IngestStats, Result};

use chrono::{DateTime, Utc};
use log::info;

use crate::blobs::BlobMeta;

// Path layouts the billing provider writes:
//   flat:        account/connector/tenant/report/month/file.csv
//   partitioned: account/connector/tenant/report/month/day/exportId/file.csv
const FLAT_SEGMENTS: usize = 6;
const PARTITIONED_SEGMENTS: usize = 8;

/// Reduce a raw blob listing to the minimal set of ingestion targets:
/// blobs modified since `cutoff`, collapsed to one path per logical report.
/// Flat reports keep the largest file per report folder; partitioned
/// reports keep a `prefix/*.csv` wildcard under the most recent date shard
/// whose name matches the report's own month.
pub fn discover_reports(blobs: &[BlobMeta], cutoff: DateTime<Utc>) -> Vec<String> {
    let recent: Vec<&BlobMeta> = blobs
        .iter()
        .filter(|blob| blob.last_modified >= cutoff)
        .collect();

    let mut by_size = recent.clone();
    by_size.sort_by(|a, b| b.size.cmp(&a.size));
    let mut reports: Vec<String> = Vec::new();
    for blob in &by_size {
        let parts: Vec<&str> = blob.name.split('/').collect();
        if parts.len() != FLAT_SEGMENTS {
            continue;
        }
        let report_folder = parts[..FLAT_SEGMENTS - 1].join("/");
        if !reports.iter().any(|path| path.starts_with(&report_folder)) {
            reports.push(blob.name.clone());
        }
    }
    info!("flat reports to ingest: {reports:?}");

    let mut by_name = recent;
    by_name.sort_by(|a, b| b.name.cmp(&a.name));
    let mut partitioned: Vec<String> = Vec::new();
    for blob in &by_name {
        let parts: Vec<&str> = blob.name.split('/').collect();
        if parts.len() != PARTITIONED_SEGMENTS {
            continue;
        }
        // The date shard must belong to the report's own month; exports for
        // neighboring months share the report folder.
        let month_folder = parts[PARTITIONED_SEGMENTS - 4];
        let digits = month_folder.split('-').next().unwrap_or("");
        let year_month = digits.get(..6).unwrap_or(digits);
        if !parts[PARTITIONED_SEGMENTS - 3].starts_with(year_month) {
            continue;
        }
        let report_folder = parts[..PARTITIONED_SEGMENTS - 3].join("/");
        if !partitioned.iter().any(|path| path.starts_with(&report_folder)) {
            partitioned.push(report_folder);
            reports.push(format!(
                "{}/*.csv",
                parts[..PARTITIONED_SEGMENTS - 1].join("/")
            ));
        }
    }
    info!("partitioned reports to ingest: {partitioned:?}");

    reports
}

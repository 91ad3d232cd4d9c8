use std::cell::RefCell;
use std::collections::HashMap;

use billsync_warehouse::{BOOTSTRAP, QuerySettings, Warehouse, WarehouseError};
use chrono::{Duration, Utc};
use ingest::{BlobLister, BlobMeta, SyncContext, run_sync};

const FULL_COLUMNS: &[&str] = &[
    "date",
    "effectiveprice",
    "billingcurrency",
    "pretaxcost",
    "subscriptionid",
    "resourceid",
    "resourcegroup",
    "metercategory",
    "metersubcategory",
    "meterid",
    "metername",
    "resourcelocation",
    "tags",
    "additionalinfo",
];

struct FailRule {
    needle: &'static str,
    remaining: usize,
}

/// Scripted warehouse: records every statement, serves DESCRIBE results per
/// path, and fails statements matching a rule a fixed number of times.
struct FakeWarehouse {
    statements: RefCell<Vec<String>>,
    columns_by_path: HashMap<String, Vec<&'static str>>,
    fail_rules: RefCell<Vec<FailRule>>,
}

impl FakeWarehouse {
    fn new() -> Self {
        Self {
            statements: RefCell::new(Vec::new()),
            columns_by_path: HashMap::new(),
            fail_rules: RefCell::new(Vec::new()),
        }
    }

    fn with_schema(mut self, path: &str, columns: &[&'static str]) -> Self {
        self.columns_by_path
            .insert(path.to_string(), columns.to_vec());
        self
    }

    fn with_failures(self, needle: &'static str, remaining: usize) -> Self {
        self.fail_rules
            .borrow_mut()
            .push(FailRule { needle, remaining });
        self
    }

    fn statements(&self) -> Vec<String> {
        self.statements.borrow().clone()
    }

    fn count_matching(&self, needle: &str) -> usize {
        self.statements
            .borrow()
            .iter()
            .filter(|sql| sql.contains(needle))
            .count()
    }
}

impl Warehouse for FakeWarehouse {
    fn command_with_settings(
        &self,
        sql: &str,
        _settings: &QuerySettings,
    ) -> Result<(), WarehouseError> {
        self.statements.borrow_mut().push(sql.to_string());
        for rule in self.fail_rules.borrow_mut().iter_mut() {
            if rule.remaining > 0 && sql.contains(rule.needle) {
                rule.remaining -= 1;
                return Err(WarehouseError::Server {
                    status: 500,
                    body: "scripted failure".to_string(),
                });
            }
        }
        Ok(())
    }

    fn query(&self, sql: &str) -> Result<Vec<Vec<String>>, WarehouseError> {
        self.statements.borrow_mut().push(sql.to_string());
        if sql.starts_with("DESCRIBE TABLE") {
            for (path, columns) in &self.columns_by_path {
                if sql.contains(path.as_str()) {
                    return Ok(columns
                        .iter()
                        .map(|name| vec![name.to_string(), "Nullable(String)".to_string()])
                        .collect());
                }
            }
            return Err(WarehouseError::Server {
                status: 404,
                body: "no schema scripted for query".to_string(),
            });
        }
        if sql.contains("mapKeys") {
            return Ok(vec![vec!["env".to_string()]]);
        }
        if sql.starts_with("SELECT DISTINCT") {
            return Ok(vec![vec!["sub-1".to_string()]]);
        }
        Ok(Vec::new())
    }
}

struct FakeLister {
    blobs: Vec<BlobMeta>,
}

impl BlobLister for FakeLister {
    fn list_blobs(&self) -> ingest::Result<Vec<BlobMeta>> {
        Ok(self.blobs.clone())
    }
}

fn recent_blob(name: &str, size: u64) -> BlobMeta {
    BlobMeta {
        name: name.to_string(),
        size,
        last_modified: Utc::now() - Duration::hours(1),
    }
}

fn context() -> SyncContext {
    SyncContext {
        connection_string:
            "BlobEndpoint=https://acct.blob.core.windows.net;SharedAccessSignature=sig".to_string(),
        container: "exports".to_string(),
        lookback_days: 1,
        markup: Default::default(),
        job: Default::default(),
        enable_cost_aggregation: false,
    }
}

const REPORT_A: &str = "acct1/conn1/tenant1/reportA/20240101-20240131/export.csv";
const REPORT_B: &str = "acct2/conn2/tenant2/reportB/20240101-20240131/export.csv";

#[test]
fn full_run_executes_every_stage_in_order() {
    let store = FakeWarehouse::new().with_schema(REPORT_A, FULL_COLUMNS);
    let lister = FakeLister {
        blobs: vec![recent_blob(REPORT_A, 2048)],
    };

    let stats = run_sync(&store, &lister, &context()).expect("run");
    assert_eq!(stats.reports_discovered, 1);
    assert_eq!(stats.reports_ingested, 1);
    assert_eq!(stats.reports_failed, 0);
    assert!(stats.issues.is_empty());

    let statements = store.statements();
    let position = |needle: &str| {
        statements
            .iter()
            .position(|sql| sql.contains(needle))
            .unwrap_or_else(|| panic!("missing statement: {needle}"))
    };
    let drop_staging = position("DROP TABLE IF EXISTS ccm.azureBilling_2024_01_conn1");
    let create_staging = position("CREATE TABLE IF NOT EXISTS ccm.azureBilling_2024_01_conn1");
    let load_staging = position("INSERT INTO ccm.azureBilling_2024_01_conn1");
    let delete_preagg = position("DELETE FROM ccm.preAggregated");
    let insert_preagg = position("INSERT INTO ccm.preAggregated");
    let delete_unified = position("DELETE FROM ccm.unifiedTable");
    let insert_unified = position("INSERT INTO ccm.unifiedTable");
    let flatten = position("ALTER TABLE ccm.unifiedTable UPDATE `label_env`");
    let sync = position("INSERT INTO ccm.connectorDataSyncStatus");
    assert!(drop_staging < create_staging);
    assert!(create_staging < load_staging);
    assert!(load_staging < delete_preagg);
    assert!(delete_preagg < insert_preagg);
    assert!(insert_preagg < delete_unified);
    assert!(delete_unified < insert_unified);
    assert!(insert_unified < flatten);
    assert!(flatten < sync);
    assert_eq!(sync, statements.len() - 1);
    assert_eq!(store.count_matching("costAggregated"), 1); // bootstrap DDL only
}

#[test]
fn mapping_failure_aborts_one_report_and_run_continues() {
    let store = FakeWarehouse::new()
        .with_schema(REPORT_A, &["date", "billingcurrency", "pretaxcost"])
        .with_schema(REPORT_B, FULL_COLUMNS);
    let lister = FakeLister {
        blobs: vec![recent_blob(REPORT_A, 4096), recent_blob(REPORT_B, 2048)],
    };

    let stats = run_sync(&store, &lister, &context()).expect("run");
    assert_eq!(stats.reports_discovered, 2);
    assert_eq!(stats.reports_ingested, 1);
    assert_eq!(stats.reports_failed, 1);
    assert_eq!(stats.issues.len(), 1);
    assert_eq!(stats.issues[0].path, REPORT_A);
    assert!(
        stats.issues[0]
            .message
            .contains("no mapping found for azureResourceRate column")
    );

    // The failing connector never gets a heartbeat; the healthy one does.
    assert_eq!(store.count_matching("connectorId = 'conn1'"), 0);
    assert_eq!(store.count_matching("connectorId = 'conn2'"), 1);
}

#[test]
fn unified_insert_is_retried_until_it_succeeds() {
    let store = FakeWarehouse::new()
        .with_schema(REPORT_A, FULL_COLUMNS)
        .with_failures("INSERT INTO ccm.unifiedTable", 2);
    let lister = FakeLister {
        blobs: vec![recent_blob(REPORT_A, 2048)],
    };

    let stats = run_sync(&store, &lister, &context()).expect("run");
    assert_eq!(stats.reports_ingested, 1);
    assert_eq!(stats.reports_failed, 0);
    assert_eq!(store.count_matching("INSERT INTO ccm.unifiedTable"), 3);
    assert_eq!(store.count_matching("INSERT INTO ccm.connectorDataSyncStatus"), 1);
}

#[test]
fn exhausted_unified_retries_fail_the_report() {
    let store = FakeWarehouse::new()
        .with_schema(REPORT_A, FULL_COLUMNS)
        .with_failures("INSERT INTO ccm.unifiedTable", 3);
    let lister = FakeLister {
        blobs: vec![recent_blob(REPORT_A, 2048)],
    };

    let stats = run_sync(&store, &lister, &context()).expect("run");
    assert_eq!(stats.reports_ingested, 0);
    assert_eq!(stats.reports_failed, 1);
    assert_eq!(store.count_matching("INSERT INTO ccm.unifiedTable"), 3);
    // No heartbeat and no label flattening after the aborted insert.
    assert_eq!(store.count_matching("INSERT INTO ccm.connectorDataSyncStatus"), 0);
    assert_eq!(store.count_matching("mapKeys"), 0);
}

#[test]
fn preaggregated_insert_is_not_retried() {
    let store = FakeWarehouse::new()
        .with_schema(REPORT_A, FULL_COLUMNS)
        .with_failures("INSERT INTO ccm.preAggregated", 1);
    let lister = FakeLister {
        blobs: vec![recent_blob(REPORT_A, 2048)],
    };

    let stats = run_sync(&store, &lister, &context()).expect("run");
    assert_eq!(stats.reports_failed, 1);
    assert_eq!(store.count_matching("INSERT INTO ccm.preAggregated"), 1);
    assert_eq!(store.count_matching("INSERT INTO ccm.unifiedTable"), 0);
}

#[test]
fn empty_discovery_skips_downstream_stages() {
    let store = FakeWarehouse::new();
    let lister = FakeLister { blobs: Vec::new() };

    let stats = run_sync(&store, &lister, &context()).expect("run");
    assert_eq!(stats.reports_discovered, 0);
    assert_eq!(stats.reports_ingested, 0);
    assert_eq!(stats.reports_failed, 0);
    // Only the bootstrap DDL ran.
    assert_eq!(store.statements().len(), BOOTSTRAP.len());
}

#[test]
fn cost_aggregation_runs_only_when_enabled() {
    let store = FakeWarehouse::new().with_schema(REPORT_A, FULL_COLUMNS);
    let lister = FakeLister {
        blobs: vec![recent_blob(REPORT_A, 2048)],
    };
    let mut context = context();
    context.enable_cost_aggregation = true;

    let stats = run_sync(&store, &lister, &context).expect("run");
    assert_eq!(stats.reports_ingested, 1);
    assert_eq!(store.count_matching("DELETE FROM ccm.costAggregated"), 1);
    assert_eq!(store.count_matching("INSERT INTO ccm.costAggregated"), 1);
}

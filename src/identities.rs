use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{employee_id_from_value, Employee, EmployeeId};
use crate::store::Store;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl ReconcileReport {
    pub fn writes(&self) -> usize {
        self.created + self.updated
    }
}

enum PairOutcome {
    Created,
    Updated,
    Unchanged,
}

pub async fn reconcile_mapping(store: &dyn Store, mapping: &Map<String, Value>) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut pairs = Vec::with_capacity(mapping.len());

    for (source_ip, raw_id) in mapping {
        match employee_id_from_value(raw_id) {
            Some(id) => pairs.push((source_ip.clone(), id)),
            None => {
                warn!(source_ip = %source_ip, employee_id = %raw_id, "skipping identity with invalid employee id");
                report.failed += 1;
            }
        }
    }

    reconcile_into(store, pairs, report).await
}

pub async fn reconcile<I>(store: &dyn Store, pairs: I) -> ReconcileReport
where
    I: IntoIterator<Item = (String, EmployeeId)>,
{
    reconcile_into(store, pairs, ReconcileReport::default()).await
}

async fn reconcile_into<I>(store: &dyn Store, pairs: I, mut report: ReconcileReport) -> ReconcileReport
where
    I: IntoIterator<Item = (String, EmployeeId)>,
{
    for (employee_id, source_ip) in collapse(pairs) {
        match reconcile_pair(store, &source_ip, employee_id).await {
            Ok(PairOutcome::Created) => report.created += 1,
            Ok(PairOutcome::Updated) => report.updated += 1,
            Ok(PairOutcome::Unchanged) => report.unchanged += 1,
            Err(err) => {
                warn!(employee_id, source_ip = %source_ip, error = %err, "failed to reconcile identity");
                report.failed += 1;
            }
        }
    }

    info!(
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        failed = report.failed,
        writes = report.writes(),
        "identities reconciled"
    );
    report
}

// One pair per employee id. When an id repeats, the greatest source IP in
// string order wins, so every run converges on the same assignment.
fn collapse<I>(pairs: I) -> BTreeMap<EmployeeId, String>
where
    I: IntoIterator<Item = (String, EmployeeId)>,
{
    let mut by_employee: BTreeMap<EmployeeId, String> = BTreeMap::new();
    for (source_ip, employee_id) in pairs {
        match by_employee.get_mut(&employee_id) {
            Some(current) if *current >= source_ip => {
                debug!(employee_id, kept = %current, superseded = %source_ip, "duplicate identity");
            }
            Some(current) => {
                debug!(employee_id, kept = %source_ip, superseded = %current, "duplicate identity");
                *current = source_ip;
            }
            None => {
                by_employee.insert(employee_id, source_ip);
            }
        }
    }
    by_employee
}

async fn reconcile_pair(
    store: &dyn Store,
    source_ip: &str,
    employee_id: EmployeeId,
) -> Result<PairOutcome, StoreError> {
    match store.employee(employee_id).await? {
        Some(existing) if existing.source_ip == source_ip => Ok(PairOutcome::Unchanged),
        Some(mut existing) => {
            existing.source_ip = source_ip.to_string();
            store.update_employee(&existing).await?;
            Ok(PairOutcome::Updated)
        }
        None => {
            let employee = Employee {
                id: employee_id,
                source_ip: source_ip.to_string(),
            };
            store.create_employee(&employee).await?;
            Ok(PairOutcome::Created)
        }
    }
}

pub async fn import_csv(store: &dyn Store, csv_path: &Path) -> anyhow::Result<ReconcileReport> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        source_ip: String,
        employee_id: EmployeeId,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut pairs = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid identity row {}", line + 1))?;
        pairs.push((row.source_ip.trim().to_string(), row.employee_id));
    }

    Ok(reconcile(store, pairs).await)
}

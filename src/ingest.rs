use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::IncidentSource;
use crate::error::{RecordError, StoreError};
use crate::models::{
    employee_id_from_value, Employee, EmployeeId, Incident, IncidentTypeConfig, IngestConfig,
    LookupStrategy, Priority,
};
use crate::store::Store;

const PRIORITY_FIELD: &str = "priority";
const TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeReport {
    pub incident_type: String,
    pub fetched: usize,
    pub stored: usize,
    pub dropped_unowned: usize,
    pub dropped_invalid: usize,
    pub error: Option<String>,
}

impl TypeReport {
    fn new(incident_type: &str) -> Self {
        Self {
            incident_type: incident_type.to_string(),
            fetched: 0,
            stored: 0,
            dropped_unowned: 0,
            dropped_invalid: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub types: Vec<TypeReport>,
    pub removed: u64,
}

impl IngestReport {
    pub fn stored(&self) -> usize {
        self.types.iter().map(|t| t.stored).sum()
    }

    pub fn dropped(&self) -> usize {
        self.types
            .iter()
            .map(|t| t.dropped_unowned + t.dropped_invalid)
            .sum()
    }

    pub fn failed_types(&self) -> Vec<&str> {
        self.types
            .iter()
            .filter(|t| t.error.is_some())
            .map(|t| t.incident_type.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OwnerKey {
    Id(EmployeeId),
    SourceIp(String),
}

#[derive(Debug, Clone, PartialEq)]
struct ParsedRecord {
    owner: OwnerKey,
    priority: Priority,
    occurred_at: DateTime<Utc>,
    information: Map<String, Value>,
}

fn parse_record(config: &IncidentTypeConfig, raw: Value) -> Result<ParsedRecord, RecordError> {
    let Value::Object(mut fields) = raw else {
        return Err(RecordError::Validation("record is not an object".to_string()));
    };

    let identifier = fields.remove(&config.identifier_field);
    let owner = match (config.lookup, identifier) {
        (_, None) | (_, Some(Value::Null)) => {
            return Err(RecordError::Lookup(format!(
                "missing `{}`",
                config.identifier_field
            )))
        }
        (LookupStrategy::EmployeeId, Some(value)) => employee_id_from_value(&value)
            .map(OwnerKey::Id)
            .ok_or_else(|| RecordError::Lookup(format!("invalid employee id {value}")))?,
        (LookupStrategy::SourceIp, Some(Value::String(ip))) => OwnerKey::SourceIp(ip),
        (LookupStrategy::SourceIp, Some(value)) => {
            return Err(RecordError::Lookup(format!("invalid source ip {value}")))
        }
    };

    let priority = match fields.remove(PRIORITY_FIELD) {
        Some(Value::String(text)) => text.parse::<Priority>().map_err(RecordError::Validation)?,
        Some(Value::Null) | None => {
            return Err(RecordError::Validation("missing priority".to_string()))
        }
        Some(other) => {
            return Err(RecordError::Validation(format!("invalid priority {other}")))
        }
    };

    let occurred_at = match fields.remove(TIMESTAMP_FIELD) {
        Some(value) => epoch_to_utc(&value)
            .ok_or_else(|| RecordError::Validation(format!("invalid timestamp {value}")))?,
        None => return Err(RecordError::Validation("missing timestamp".to_string())),
    };

    Ok(ParsedRecord {
        owner,
        priority,
        occurred_at,
        information: fields,
    })
}

/// Epoch seconds (integer or fractional) to a UTC instant.
fn epoch_to_utc(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value.as_i64() {
        return DateTime::from_timestamp(secs, 0);
    }

    let secs = value.as_f64()?;
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

async fn resolve_owner(store: &dyn Store, owner: &OwnerKey) -> Result<Option<Employee>, StoreError> {
    match owner {
        OwnerKey::Id(id) => store.employee(*id).await,
        OwnerKey::SourceIp(ip) => store.employee_by_source_ip(ip).await,
    }
}

pub struct IngestPipeline {
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    // Only a failed final replace is an error; the old incidents then remain.
    pub async fn run(
        &self,
        source: &dyn IncidentSource,
        store: &dyn Store,
    ) -> Result<IngestReport, StoreError> {
        let mut staged = Vec::new();
        let mut types = Vec::with_capacity(self.config.types.len());

        for config in &self.config.types {
            let mut report = TypeReport::new(&config.name);
            if let Err(err) = self
                .ingest_type(config, source, store, &mut staged, &mut report)
                .await
            {
                warn!(incident_type = %config.name, error = %err, "skipping incident type");
                report.error = Some(err);
            }
            types.push(report);
        }

        let removed = store.replace_incidents(staged).await?;
        let report = IngestReport { types, removed };
        info!(
            stored = report.stored(),
            dropped = report.dropped(),
            removed = report.removed,
            failed_types = ?report.failed_types(),
            "incidents rebuilt"
        );
        Ok(report)
    }

    async fn ingest_type(
        &self,
        config: &IncidentTypeConfig,
        source: &dyn IncidentSource,
        store: &dyn Store,
        staged: &mut Vec<Incident>,
        report: &mut TypeReport,
    ) -> Result<(), String> {
        let records = source
            .incidents(&config.name)
            .await
            .map_err(|err| err.to_string())?;
        report.fetched = records.len();

        // Staged separately so a lookup failure discards this type as a whole.
        let mut accepted = Vec::new();
        for raw in records {
            let parsed = match parse_record(config, raw) {
                Ok(parsed) => parsed,
                Err(err) => {
                    record_drop(config, report, &err);
                    continue;
                }
            };

            let employee = resolve_owner(store, &parsed.owner)
                .await
                .map_err(|err| err.to_string())?;
            let Some(employee) = employee else {
                let err = RecordError::Lookup(format!("{:?} matches no employee", parsed.owner));
                record_drop(config, report, &err);
                continue;
            };

            accepted.push(Incident {
                id: Uuid::new_v4(),
                employee_id: employee.id,
                incident_type: config.name.clone(),
                priority: parsed.priority,
                occurred_at: parsed.occurred_at,
                information: parsed.information,
            });
        }

        report.stored = accepted.len();
        staged.append(&mut accepted);
        Ok(())
    }
}

fn record_drop(config: &IncidentTypeConfig, report: &mut TypeReport, err: &RecordError) {
    match err {
        RecordError::Lookup(_) => report.dropped_unowned += 1,
        RecordError::Validation(_) => report.dropped_invalid += 1,
    }
    debug!(incident_type = %config.name, reason = %err, "dropping incident record");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub identities: Map<String, Value>,
        pub incidents: HashMap<String, Vec<Value>>,
        pub failing: Vec<String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        pub fn with_incidents(mut self, incident_type: &str, records: Value) -> Self {
            let Value::Array(records) = records else {
                panic!("records must be an array");
            };
            self.incidents.insert(incident_type.to_string(), records);
            self
        }

        pub fn with_identities(mut self, identities: Value) -> Self {
            let Value::Object(identities) = identities else {
                panic!("identities must be an object");
            };
            self.identities = identities;
            self
        }

        pub fn failing(mut self, incident_type: &str) -> Self {
            self.failing.push(incident_type.to_string());
            self
        }
    }

    #[async_trait]
    impl IncidentSource for FakeSource {
        async fn identities(&self) -> Result<Map<String, Value>, ApiError> {
            self.calls.lock().unwrap().push("identities".to_string());
            Ok(self.identities.clone())
        }

        async fn incidents(&self, incident_type: &str) -> Result<Vec<Value>, ApiError> {
            self.calls.lock().unwrap().push(incident_type.to_string());
            if self.failing.iter().any(|t| t == incident_type) {
                return Err(ApiError::Status {
                    url: format!("fake/incidents/{incident_type}/"),
                    status: StatusCode::BAD_GATEWAY,
                });
            }
            Ok(self.incidents.get(incident_type).cloned().unwrap_or_default())
        }
    }

    async fn store_with(employees: &[(EmployeeId, &str)]) -> MemoryStore {
        let store = MemoryStore::new();
        for (id, ip) in employees {
            store
                .create_employee(&Employee {
                    id: *id,
                    source_ip: ip.to_string(),
                })
                .await
                .unwrap();
        }
        store
    }

    fn denial_config() -> IncidentTypeConfig {
        IncidentTypeConfig::new("denial", "reported_by", LookupStrategy::EmployeeId)
    }

    #[test]
    fn parses_denial_record_and_strips_consumed_fields() {
        let raw = json!({"reported_by": 9, "priority": "high", "timestamp": 1700000000, "note": "x"});
        let parsed = parse_record(&denial_config(), raw).unwrap();

        assert_eq!(parsed.owner, OwnerKey::Id(9));
        assert_eq!(parsed.priority, Priority::High);
        assert_eq!(parsed.occurred_at.to_rfc3339(), "2023-11-14T22:13:20+00:00");
        assert_eq!(Value::Object(parsed.information), json!({"note": "x"}));
    }

    #[test]
    fn rejects_missing_or_unknown_priority() {
        let missing = json!({"reported_by": 9, "timestamp": 1700000000});
        let unknown = json!({"reported_by": 9, "priority": "urgent", "timestamp": 1700000000});

        assert!(matches!(
            parse_record(&denial_config(), missing),
            Err(RecordError::Validation(_))
        ));
        assert!(matches!(
            parse_record(&denial_config(), unknown),
            Err(RecordError::Validation(_))
        ));
    }

    #[test]
    fn rejects_missing_identifier_and_bad_timestamp() {
        let no_owner = json!({"priority": "low", "timestamp": 1});
        let bad_time = json!({"reported_by": 9, "priority": "low", "timestamp": "yesterday"});

        assert!(matches!(
            parse_record(&denial_config(), no_owner),
            Err(RecordError::Lookup(_))
        ));
        assert!(matches!(
            parse_record(&denial_config(), bad_time),
            Err(RecordError::Validation(_))
        ));
    }

    #[test]
    fn fractional_timestamps_keep_subseconds() {
        let at = epoch_to_utc(&json!(1700000000.5)).unwrap();
        assert_eq!(at.timestamp(), 1700000000);
        assert_eq!(at.timestamp_subsec_millis(), 500);
        assert!(epoch_to_utc(&json!(null)).is_none());
    }

    #[tokio::test]
    async fn keeps_exactly_the_owned_and_valid_records() {
        let store = store_with(&[(9, "10.0.0.5"), (4, "10.0.0.9")]).await;
        let source = FakeSource::default()
            .with_incidents(
                "denial",
                json!([
                    {"reported_by": 9, "priority": "high", "timestamp": 1700000000, "note": "x"},
                    {"reported_by": 9, "timestamp": 1700000000},
                    {"reported_by": 77, "priority": "low", "timestamp": 1700000000}
                ]),
            )
            .with_incidents(
                "probing",
                json!([
                    {"ip": "10.0.0.9", "priority": "critical", "timestamp": 1700000100},
                    {"ip": "192.168.1.1", "priority": "critical", "timestamp": 1700000100}
                ]),
            );

        let report = IngestPipeline::new(IngestConfig::default())
            .run(&source, &store)
            .await
            .unwrap();

        let stored = store.all_incidents().await;
        assert_eq!(stored.len(), 2);
        assert_eq!(report.stored(), 2);
        assert_eq!(report.dropped(), 3);

        let denial = stored.iter().find(|i| i.incident_type == "denial").unwrap();
        assert_eq!(denial.employee_id, 9);
        assert_eq!(Value::Object(denial.information.clone()), json!({"note": "x"}));

        let probing = stored.iter().find(|i| i.incident_type == "probing").unwrap();
        assert_eq!(probing.employee_id, 4);
        assert_eq!(probing.priority, Priority::Critical);
        assert!(!probing.information.contains_key("ip"));
    }

    #[tokio::test]
    async fn shared_source_ip_resolves_to_lowest_id_only() {
        let store = store_with(&[(12, "10.0.0.1"), (5, "10.0.0.1")]).await;
        let source = FakeSource::default().with_incidents(
            "intrusion",
            json!([{"internal_ip": "10.0.0.1", "priority": "medium", "timestamp": 1}]),
        );

        IngestPipeline::new(IngestConfig::default())
            .run(&source, &store)
            .await
            .unwrap();

        let stored = store.all_incidents().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].employee_id, 5);
    }

    #[tokio::test]
    async fn failed_type_is_isolated_and_previous_set_is_replaced() {
        let store = store_with(&[(9, "10.0.0.5")]).await;
        let first = FakeSource::default().with_incidents(
            "misuse",
            json!([{"employee_id": 9, "priority": "low", "timestamp": 1}]),
        );
        let pipeline = IngestPipeline::new(IngestConfig::default());
        pipeline.run(&first, &store).await.unwrap();

        let second = FakeSource::default()
            .failing("denial")
            .with_incidents(
                "unauthorized",
                json!([{"employee_id": "9", "priority": "high", "timestamp": 2}]),
            );
        let report = pipeline.run(&second, &store).await.unwrap();

        assert_eq!(report.failed_types(), vec!["denial"]);
        assert_eq!(report.removed, 1);
        let stored = store.all_incidents().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].incident_type, "unauthorized");

        let calls = second.calls.lock().unwrap();
        assert_eq!(calls.len(), IngestConfig::default().types.len());
    }
}

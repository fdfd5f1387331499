use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type EmployeeId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Employee {
    pub id: EmployeeId,
    pub source_ip: String,
}

pub fn employee_id_from_value(value: &Value) -> Option<EmployeeId> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Incident {
    pub id: Uuid,
    pub employee_id: EmployeeId,
    pub incident_type: String,
    pub priority: Priority,
    pub occurred_at: DateTime<Utc>,
    pub information: Map<String, Value>,
}

/// How the owner of a raw incident record is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    EmployeeId,
    SourceIp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentTypeConfig {
    pub name: String,
    pub identifier_field: String,
    pub lookup: LookupStrategy,
}

impl IncidentTypeConfig {
    pub fn new(name: &str, identifier_field: &str, lookup: LookupStrategy) -> Self {
        Self {
            name: name.to_string(),
            identifier_field: identifier_field.to_string(),
            lookup,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub types: Vec<IncidentTypeConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        use LookupStrategy::{EmployeeId, SourceIp};

        Self {
            types: vec![
                IncidentTypeConfig::new("denial", "reported_by", EmployeeId),
                IncidentTypeConfig::new("intrusion", "internal_ip", SourceIp),
                IncidentTypeConfig::new("executable", "machine_ip", SourceIp),
                IncidentTypeConfig::new("misuse", "employee_id", EmployeeId),
                IncidentTypeConfig::new("unauthorized", "employee_id", EmployeeId),
                IncidentTypeConfig::new("probing", "ip", SourceIp),
                IncidentTypeConfig::new("other", "identifier", SourceIp),
            ],
        }
    }
}

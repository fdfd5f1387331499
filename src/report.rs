use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::StoreError;
use crate::models::{EmployeeId, Incident, Priority};
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityBucket {
    pub count: usize,
    pub incidents: Vec<Value>,
}

impl PriorityBucket {
    fn from_incidents(incidents: Vec<Incident>) -> Self {
        Self {
            count: incidents.len(),
            incidents: incidents
                .into_iter()
                .map(|incident| Value::Object(incident.information))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmployeeSummary {
    pub low: PriorityBucket,
    pub medium: PriorityBucket,
    pub high: PriorityBucket,
    pub critical: PriorityBucket,
}

impl EmployeeSummary {
    pub fn bucket(&self, priority: Priority) -> &PriorityBucket {
        match priority {
            Priority::Low => &self.low,
            Priority::Medium => &self.medium,
            Priority::High => &self.high,
            Priority::Critical => &self.critical,
        }
    }

    fn bucket_mut(&mut self, priority: Priority) -> &mut PriorityBucket {
        match priority {
            Priority::Low => &mut self.low,
            Priority::Medium => &mut self.medium,
            Priority::High => &mut self.high,
            Priority::Critical => &mut self.critical,
        }
    }

    pub fn total(&self) -> usize {
        Priority::ALL.iter().map(|p| self.bucket(*p).count).sum()
    }
}

// Keys serialize as decimal strings in ascending numeric order.
pub type Snapshot = BTreeMap<EmployeeId, EmployeeSummary>;

pub async fn build_snapshot(store: &dyn Store) -> Result<Snapshot, StoreError> {
    let mut snapshot = Snapshot::new();

    for employee in store.employees().await? {
        let mut summary = EmployeeSummary::default();
        for priority in Priority::ALL {
            let incidents = store.incidents_for(employee.id, priority).await?;
            *summary.bucket_mut(priority) = PriorityBucket::from_incidents(incidents);
        }

        if summary.total() > 0 {
            snapshot.insert(employee.id, summary);
        }
    }

    info!(
        employees = snapshot.len(),
        incidents = snapshot.values().map(EmployeeSummary::total).sum::<usize>(),
        "snapshot built"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Employee;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Map};
    use uuid::Uuid;

    fn incident(employee_id: EmployeeId, priority: Priority, secs: i64, note: &str) -> Incident {
        let mut information = Map::new();
        information.insert("note".to_string(), json!(note));
        Incident {
            id: Uuid::new_v4(),
            employee_id,
            incident_type: "denial".to_string(),
            priority,
            occurred_at: Utc.timestamp_opt(secs, 0).unwrap(),
            information,
        }
    }

    async fn store_with(ids: &[EmployeeId], incidents: Vec<Incident>) -> MemoryStore {
        let store = MemoryStore::new();
        for id in ids {
            store
                .create_employee(&Employee {
                    id: *id,
                    source_ip: format!("10.0.0.{id}"),
                })
                .await
                .unwrap();
        }
        store.replace_incidents(incidents).await.unwrap();
        store
    }

    #[tokio::test]
    async fn single_high_incident_yields_full_priority_entry() {
        let store = store_with(&[9], vec![incident(9, Priority::High, 1700000000, "x")]).await;
        let snapshot = build_snapshot(&store).await.unwrap();

        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({
                "9": {
                    "low": {"count": 0, "incidents": []},
                    "medium": {"count": 0, "incidents": []},
                    "high": {"count": 1, "incidents": [{"note": "x"}]},
                    "critical": {"count": 0, "incidents": []}
                }
            })
        );
    }

    #[tokio::test]
    async fn omits_employees_without_incidents() {
        let store = store_with(&[1, 2, 3], vec![incident(2, Priority::Low, 1, "a")]).await;
        let snapshot = build_snapshot(&store).await.unwrap();

        assert_eq!(snapshot.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn counts_match_store_and_keys_are_numerically_ordered() {
        let store = store_with(
            &[10, 9],
            vec![
                incident(10, Priority::Critical, 5, "late"),
                incident(10, Priority::Critical, 1, "early"),
                incident(10, Priority::Medium, 3, "m"),
                incident(9, Priority::Low, 2, "l"),
            ],
        )
        .await;
        let snapshot = build_snapshot(&store).await.unwrap();

        let ten = &snapshot[&10];
        assert_eq!(ten.critical.count, 2);
        assert_eq!(ten.critical.incidents, vec![json!({"note": "early"}), json!({"note": "late"})]);
        assert_eq!(ten.medium.count, 1);
        assert_eq!(ten.total(), 3);
        for priority in Priority::ALL {
            let stored = store.incidents_for(9, priority).await.unwrap();
            assert_eq!(snapshot[&9].bucket(priority).count, stored.len());
        }

        let text = serde_json::to_string(&snapshot).unwrap();
        assert!(text.find("\"9\"").unwrap() < text.find("\"10\"").unwrap());
    }
}

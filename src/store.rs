use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{Employee, EmployeeId, Incident, Priority};

#[async_trait]
pub trait Store: Send + Sync {
    async fn employee(&self, id: EmployeeId) -> Result<Option<Employee>, StoreError>;

    /// Employee currently using `source_ip`. When several share it, the one
    /// with the lowest id wins.
    async fn employee_by_source_ip(&self, source_ip: &str)
        -> Result<Option<Employee>, StoreError>;

    async fn create_employee(&self, employee: &Employee) -> Result<(), StoreError>;

    async fn update_employee(&self, employee: &Employee) -> Result<(), StoreError>;

    async fn employees(&self) -> Result<Vec<Employee>, StoreError>;

    /// Deletes every stored incident and inserts `incidents` as one step.
    /// Returns the number of incidents removed.
    async fn replace_incidents(&self, incidents: Vec<Incident>) -> Result<u64, StoreError>;

    async fn incidents_for(
        &self,
        employee_id: EmployeeId,
        priority: Priority,
    ) -> Result<Vec<Incident>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    employees: BTreeMap<EmployeeId, Employee>,
    incidents: Vec<Incident>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn employee(&self, id: EmployeeId) -> Result<Option<Employee>, StoreError> {
        Ok(self.state.read().await.employees.get(&id).cloned())
    }

    async fn employee_by_source_ip(
        &self,
        source_ip: &str,
    ) -> Result<Option<Employee>, StoreError> {
        let state = self.state.read().await;
        // BTreeMap iterates in id order, so the first hit is the lowest id.
        Ok(state
            .employees
            .values()
            .find(|employee| employee.source_ip == source_ip)
            .cloned())
    }

    async fn create_employee(&self, employee: &Employee) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.employees.contains_key(&employee.id) {
            return Err(StoreError::Conflict(format!("employee {}", employee.id)));
        }
        state.employees.insert(employee.id, employee.clone());
        Ok(())
    }

    async fn update_employee(&self, employee: &Employee) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.employees.get_mut(&employee.id) {
            Some(existing) => {
                existing.source_ip = employee.source_ip.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(format!("employee {}", employee.id))),
        }
    }

    async fn employees(&self) -> Result<Vec<Employee>, StoreError> {
        Ok(self.state.read().await.employees.values().cloned().collect())
    }

    async fn replace_incidents(&self, incidents: Vec<Incident>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        if let Some(orphan) = incidents
            .iter()
            .find(|incident| !state.employees.contains_key(&incident.employee_id))
        {
            return Err(StoreError::InvalidRow(format!(
                "incident {} references unknown employee {}",
                orphan.id, orphan.employee_id
            )));
        }

        let removed = std::mem::replace(&mut state.incidents, incidents);
        Ok(removed.len() as u64)
    }

    async fn incidents_for(
        &self,
        employee_id: EmployeeId,
        priority: Priority,
    ) -> Result<Vec<Incident>, StoreError> {
        let state = self.state.read().await;
        let mut matching: Vec<Incident> = state
            .incidents
            .iter()
            .filter(|incident| incident.employee_id == employee_id && incident.priority == priority)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }
}

#[cfg(test)]
impl MemoryStore {
    pub async fn all_incidents(&self) -> Vec<Incident> {
        self.state.read().await.incidents.clone()
    }
}

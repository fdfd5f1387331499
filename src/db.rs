use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Employee, EmployeeId, Incident, Priority};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn employee_from_row(row: &PgRow) -> Result<Employee, StoreError> {
    Ok(Employee {
        id: row.try_get("id")?,
        source_ip: row.try_get("source_ip")?,
    })
}

fn incident_from_row(row: &PgRow) -> Result<Incident, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let priority: String = row.try_get("priority")?;
    let priority = priority
        .parse::<Priority>()
        .map_err(|err| StoreError::InvalidRow(format!("incident {id}: {err}")))?;
    let information = match row.try_get::<Value, _>("information")? {
        Value::Object(map) => map,
        _ => {
            return Err(StoreError::InvalidRow(format!(
                "incident {id}: information is not an object"
            )))
        }
    };
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at")?;

    Ok(Incident {
        id,
        employee_id: row.try_get("employee_id")?,
        incident_type: row.try_get("incident_type")?,
        priority,
        occurred_at,
        information,
    })
}

async fn insert_incident(conn: &mut PgConnection, incident: &Incident) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO incident_sync.incidents
        (id, employee_id, incident_type, priority, occurred_at, information)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(incident.id)
    .bind(incident.employee_id)
    .bind(&incident.incident_type)
    .bind(incident.priority.as_str())
    .bind(incident.occurred_at)
    .bind(Value::Object(incident.information.clone()))
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn employee(&self, id: EmployeeId) -> Result<Option<Employee>, StoreError> {
        sqlx::query("SELECT id, source_ip FROM incident_sync.employees WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(employee_from_row)
            .transpose()
    }

    async fn employee_by_source_ip(
        &self,
        source_ip: &str,
    ) -> Result<Option<Employee>, StoreError> {
        sqlx::query(
            "SELECT id, source_ip FROM incident_sync.employees \
             WHERE source_ip = $1 ORDER BY id LIMIT 1",
        )
        .bind(source_ip)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(employee_from_row)
        .transpose()
    }

    async fn create_employee(&self, employee: &Employee) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO incident_sync.employees (id, source_ip)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(employee.id)
        .bind(&employee.source_ip)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("employee {}", employee.id)));
        }
        Ok(())
    }

    async fn update_employee(&self, employee: &Employee) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE incident_sync.employees SET source_ip = $2 WHERE id = $1")
            .bind(employee.id)
            .bind(&employee.source_ip)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("employee {}", employee.id)));
        }
        Ok(())
    }

    async fn employees(&self) -> Result<Vec<Employee>, StoreError> {
        let rows = sqlx::query("SELECT id, source_ip FROM incident_sync.employees ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(employee_from_row).collect()
    }

    async fn replace_incidents(&self, incidents: Vec<Incident>) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM incident_sync.incidents")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for incident in &incidents {
            insert_incident(&mut tx, incident).await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn incidents_for(
        &self,
        employee_id: EmployeeId,
        priority: Priority,
    ) -> Result<Vec<Incident>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, employee_id, incident_type, priority, occurred_at, information
            FROM incident_sync.incidents
            WHERE employee_id = $1 AND priority = $2
            ORDER BY occurred_at, id
            "#,
        )
        .bind(employee_id)
        .bind(priority.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(incident_from_row).collect()
    }
}

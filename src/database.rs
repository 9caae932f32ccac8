#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use chrono::{DateTime, Utc};
#[cfg(feature = "database")]
use sqlx::{migrate::MigrateDatabase, sqlite::SqliteRow, Row, SqlitePool};
#[cfg(feature = "database")]
use tracing::info;
#[cfg(feature = "database")]
use uuid::Uuid;

#[cfg(feature = "database")]
use crate::config::DatabaseConfig;
#[cfg(feature = "database")]
use crate::store::StoredWorkflow;
#[cfg(feature = "database")]
use crate::workflow::approvals::{ApprovalRecord, EntityType};
#[cfg(feature = "database")]
use crate::workflow::errors::StoreError;
#[cfg(feature = "database")]
use crate::workflow::reconciliation::PendingEmission;
#[cfg(feature = "database")]
use crate::workflow::traits::{ApprovalRepository, InconsistencyLog, WorkflowRepository};
#[cfg(feature = "database")]
use crate::workflow::types::{
    ActorId, OrganizationId, StepStamp, WorkflowId, WorkflowRecord, WorkflowState,
};

#[cfg(feature = "database")]
/// SQLite-backed store for workflows, approvals and pending emissions
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[cfg(feature = "database")]
impl SqliteStore {
    /// Open (creating if needed) and optionally migrate the database
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        if !sqlx::Sqlite::database_exists(&config.url).await? {
            info!("Creating database at {}", config.url);
            sqlx::Sqlite::create_database(&config.url).await?;
        }

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&config.url)
            .await?;

        if config.auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|err| StoreError::Unavailable(format!("migration failed: {err}")))?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

#[cfg(feature = "database")]
fn corrupt(column: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{column}: {err}"))
}

#[cfg(feature = "database")]
fn workflow_from_row(row: &SqliteRow) -> Result<WorkflowRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let organization_id: String = row.try_get("organization_id")?;
    let steps: String = row.try_get("steps")?;

    StoredWorkflow {
        id: id.parse().map_err(|err| corrupt("id", err))?,
        organization_id: organization_id
            .parse()
            .map_err(|err| corrupt("organization_id", err))?,
        state: row.try_get("state")?,
        steps: serde_json::from_str(&steps)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }
    .into_record()
}

#[cfg(feature = "database")]
fn approval_from_row(row: &SqliteRow) -> Result<ApprovalRecord, StoreError> {
    let organization_id: String = row.try_get("organization_id")?;
    let workflow_id: String = row.try_get("workflow_id")?;
    let entity_type: String = row.try_get("entity_type")?;
    let decision: String = row.try_get("decision")?;
    let decided_by: String = row.try_get("decided_by")?;

    Ok(ApprovalRecord {
        organization_id: organization_id
            .parse()
            .map_err(|err| corrupt("organization_id", err))?,
        workflow_id: workflow_id.parse().map_err(|err| corrupt("workflow_id", err))?,
        entity_type: entity_type
            .parse()
            .map_err(|err| corrupt("entity_type", err))?,
        entity_id: row.try_get("entity_id")?,
        decision: decision.parse().map_err(|err| corrupt("decision", err))?,
        feedback: row.try_get("feedback")?,
        decided_by: ActorId::new(decided_by),
        decided_at: row.try_get("decided_at")?,
    })
}

#[cfg(feature = "database")]
fn pending_from_row(row: &SqliteRow) -> Result<PendingEmission, StoreError> {
    let id: String = row.try_get("id")?;
    let workflow_id: String = row.try_get("workflow_id")?;
    let organization_id: String = row.try_get("organization_id")?;
    let boundary_state: String = row.try_get("boundary_state")?;
    let event: String = row.try_get("event")?;
    let attempts: i64 = row.try_get("attempts")?;

    Ok(PendingEmission {
        id: id.parse().map_err(|err| corrupt("id", err))?,
        workflow_id: workflow_id.parse().map_err(|err| corrupt("workflow_id", err))?,
        organization_id: organization_id
            .parse()
            .map_err(|err| corrupt("organization_id", err))?,
        boundary_state: boundary_state.parse()?,
        event: serde_json::from_str(&event)?,
        reason: row.try_get("reason")?,
        recorded_at: row.try_get("recorded_at")?,
        recorded_on: row.try_get("recorded_on")?,
        attempts: u32::try_from(attempts).map_err(|err| corrupt("attempts", err))?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

#[cfg(feature = "database")]
#[async_trait]
impl WorkflowRepository for SqliteStore {
    async fn create(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO workflows (id, organization_id, state, steps, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.organization_id.to_string())
        .bind(record.state.as_str())
        .bind(serde_json::to_string(&record.steps)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(format!("workflow {}", record.id)));
        }
        Ok(())
    }

    async fn get(
        &self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
    ) -> Result<Option<WorkflowRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, state, steps, created_at, updated_at
            FROM workflows
            WHERE id = ?1 AND organization_id = ?2
            "#,
        )
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn conditional_update(
        &self,
        id: &WorkflowId,
        organization_id: &OrganizationId,
        expected: WorkflowState,
        next: WorkflowState,
        stamp: &StepStamp,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = WorkflowRepository::get(self, id, organization_id).await? else {
            return Ok(false);
        };
        if record.state != expected {
            return Ok(false);
        }
        record.apply_stamp(next, stamp);

        // the state predicate makes the write a compare-and-set
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET state = ?1, steps = ?2, updated_at = ?3
            WHERE id = ?4 AND organization_id = ?5 AND state = ?6
            "#,
        )
        .bind(next.as_str())
        .bind(serde_json::to_string(&record.steps)?)
        .bind(record.updated_at)
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl ApprovalRepository for SqliteStore {
    async fn upsert(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO approvals
                (organization_id, workflow_id, entity_type, entity_id, decision, feedback, decided_by, decided_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(record.organization_id.to_string())
        .bind(record.workflow_id.to_string())
        .bind(record.entity_type.as_str())
        .bind(&record.entity_id)
        .bind(record.decision.as_str())
        .bind(&record.feedback)
        .bind(record.decided_by.as_str())
        .bind(record.decided_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(
        &self,
        organization_id: &OrganizationId,
        workflow_id: &WorkflowId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM approvals
            WHERE organization_id = ?1 AND workflow_id = ?2 AND entity_type = ?3 AND entity_id = ?4
            "#,
        )
        .bind(organization_id.to_string())
        .bind(workflow_id.to_string())
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(approval_from_row).transpose()
    }

    async fn list_for_workflow(
        &self,
        organization_id: &OrganizationId,
        workflow_id: &WorkflowId,
        entity_type: EntityType,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM approvals
            WHERE organization_id = ?1 AND workflow_id = ?2 AND entity_type = ?3
            ORDER BY decided_at ASC
            "#,
        )
        .bind(organization_id.to_string())
        .bind(workflow_id.to_string())
        .bind(entity_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(approval_from_row).collect()
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl InconsistencyLog for SqliteStore {
    async fn record(&self, pending: &PendingEmission) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pending_emissions
                (id, workflow_id, organization_id, boundary_state, event, reason, recorded_at, recorded_on, attempts, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(pending.id.to_string())
        .bind(pending.workflow_id.to_string())
        .bind(pending.organization_id.to_string())
        .bind(pending.boundary_state.as_str())
        .bind(serde_json::to_string(&pending.event)?)
        .bind(&pending.reason)
        .bind(pending.recorded_at)
        .bind(&pending.recorded_on)
        .bind(i64::from(pending.attempts))
        .bind(pending.resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pending(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<PendingEmission>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM pending_emissions
            WHERE resolved_at IS NULL AND attempts < ?1
            ORDER BY recorded_at ASC
            LIMIT ?2
            "#,
        )
        .bind(i64::from(max_attempts))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pending_from_row).collect()
    }

    async fn exhausted(&self, max_attempts: u32) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pending_emissions WHERE resolved_at IS NULL AND attempts >= ?1",
        )
        .bind(i64::from(max_attempts))
        .fetch_one(&self.pool)
        .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn mark_resolved(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE pending_emissions SET resolved_at = ?1 WHERE id = ?2")
            .bind(at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("pending emission {id}")));
        }
        Ok(())
    }

    async fn record_failed_attempt(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE pending_emissions SET attempts = attempts + 1, reason = ?1 WHERE id = ?2",
        )
        .bind(reason)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("pending emission {id}")));
        }
        Ok(())
    }
}

//! Audit records (EtlEvents) describing one routing invocation.

use crate::config::AuditConfig;
use crate::storage::ObjectStorage;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Failed to serialize audit record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to persist audit record: {0}")]
    Persist(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Information,
    Error,
}

/// One log line of an audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLine {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub caller_name: String,
    pub caller_version: String,
    pub message: String,
}

/// Account of one invocation: what came in, what went out, and whether it failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub caller_name: String,
    pub caller_version: String,
    pub environment: String,
    pub created_at: DateTime<Utc>,
    pub logs: Vec<AuditLine>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub error: bool,
}

impl AuditRecord {
    pub fn new(
        caller_name: impl Into<String>,
        caller_version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            caller_name: caller_name.into(),
            caller_version: caller_version.into(),
            environment: environment.into(),
            created_at: Utc::now(),
            logs: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            error: false,
        }
    }

    pub fn log_information(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(audit_id = %self.id, "{}", message);
        self.push(AuditLevel::Information, message);
    }

    /// Record an error line and mark the record failed
    pub fn log_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(audit_id = %self.id, "{}", message);
        self.push(AuditLevel::Error, message);
        self.error = true;
    }

    pub fn add_input(&mut self, input: impl Into<String>) {
        self.inputs.push(input.into());
    }

    pub fn add_output(&mut self, output: impl Into<String>) {
        self.outputs.push(output.into());
    }

    /// Lines logged at the given level
    pub fn lines(&self, level: AuditLevel) -> impl Iterator<Item = &AuditLine> {
        self.logs.iter().filter(move |line| line.level == level)
    }

    fn push(&mut self, level: AuditLevel, message: String) {
        self.logs.push(AuditLine {
            timestamp: Utc::now(),
            level,
            caller_name: self.caller_name.clone(),
            caller_version: self.caller_version.clone(),
            message,
        });
    }
}

/// Destination for finished audit records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist the record, returning where it was written
    async fn write(&self, record: &AuditRecord) -> Result<String, AuditError>;
}

/// Writes records as JSON objects next to the routed data
pub struct ObjectStoreAuditSink {
    storage: Arc<dyn ObjectStorage>,
    container: String,
    project_id: String,
}

impl ObjectStoreAuditSink {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        container: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            container: container.into(),
            project_id: project_id.into(),
        }
    }

    /// Key format: {project}/etl-events/{yyyy}/{mm}/{id}.json
    pub fn record_key(&self, record: &AuditRecord) -> String {
        format!(
            "{}/etl-events/{}/{}.json",
            self.project_id,
            record.created_at.format("%Y/%m"),
            record.id
        )
    }
}

#[async_trait]
impl AuditSink for ObjectStoreAuditSink {
    #[instrument(skip(self, record), fields(audit_id = %record.id))]
    async fn write(&self, record: &AuditRecord) -> Result<String, AuditError> {
        let body = serde_json::to_vec_pretty(record)?;
        let key = self.record_key(record);

        self.storage
            .put(&self.container, &key, Bytes::from(body), "application/json")
            .await
            .map_err(|e| AuditError::Persist(e.to_string()))
    }
}

/// Writes records into the `etl_events` table
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub async fn new(config: &AuditConfig) -> anyhow::Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .context("audit.database_url is required for the postgres sink")?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to audit database");

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    #[instrument(skip(self, record), fields(audit_id = %record.id))]
    async fn write(&self, record: &AuditRecord) -> Result<String, AuditError> {
        let logs = serde_json::to_value(&record.logs)?;

        sqlx::query(
            r#"
            INSERT INTO etl_events (
                id, caller_name, caller_version, environment,
                created_at, logs, inputs, outputs, error
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9
            )
            "#,
        )
        .bind(record.id)
        .bind(&record.caller_name)
        .bind(&record.caller_version)
        .bind(&record.environment)
        .bind(record.created_at)
        .bind(&logs)
        .bind(&record.inputs)
        .bind(&record.outputs)
        .bind(record.error)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::Persist(e.to_string()))?;

        Ok(format!("postgres://etl_events/{}", record.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockObjectStorage;
    use chrono::TimeZone;

    #[test]
    fn test_error_line_sets_flag() {
        let mut record = AuditRecord::new("TransientRouter.route()", "v0.1.7", "Test");
        record.log_information("Parsing event");
        assert!(!record.error);

        record.log_error("header could not be read");
        assert!(record.error);
        assert_eq!(record.logs.len(), 2);
        assert_eq!(record.lines(AuditLevel::Error).count(), 1);
        assert_eq!(record.logs[1].caller_version, "v0.1.7");
    }

    #[test]
    fn test_serialized_shape() {
        let mut record = AuditRecord::new("caller", "v1", "Test");
        record.add_input("EventGridEvent.Subject: /blobs/x.dat");
        record.add_output("s3://raw/p/x.dat");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["caller_name"], "caller");
        assert_eq!(value["inputs"][0], "EventGridEvent.Subject: /blobs/x.dat");
        assert_eq!(value["outputs"][0], "s3://raw/p/x.dat");
        assert_eq!(value["error"], false);
    }

    #[test]
    fn test_object_store_sink_key() {
        let sink = ObjectStoreAuditSink::new(Arc::new(MockObjectStorage::new()), "raw", "cafmet");
        let mut record = AuditRecord::new("caller", "v1", "Test");
        record.created_at = Utc.with_ymd_and_hms(2023, 7, 15, 20, 0, 5).unwrap();

        assert_eq!(
            sink.record_key(&record),
            format!("cafmet/etl-events/2023/07/{}.json", record.id)
        );
    }

    #[test]
    fn test_object_store_sink_writes_json() {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_put()
            .withf(|container, key, body, content_type| {
                let parsed: serde_json::Value = serde_json::from_slice(body).unwrap();
                container == "raw"
                    && key.starts_with("cafmet/etl-events/")
                    && content_type == "application/json"
                    && parsed["error"] == true
            })
            .times(1)
            .returning(|container, key, _, _| Ok(format!("s3://{}/{}", container, key)));

        let sink = ObjectStoreAuditSink::new(Arc::new(storage), "raw", "cafmet");
        let mut record = AuditRecord::new("caller", "v1", "Test");
        record.log_error("boom");

        let uri = tokio_test::block_on(sink.write(&record)).unwrap();
        assert!(uri.starts_with("s3://raw/cafmet/etl-events/"));
        assert!(uri.ends_with(&format!("{}.json", record.id)));
    }

    #[test]
    fn test_object_store_sink_failure() {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_put()
            .returning(|_, _, _, _| Err(crate::storage::StorageError::Backend("denied".to_string())));

        let sink = ObjectStoreAuditSink::new(Arc::new(storage), "raw", "cafmet");
        let record = AuditRecord::new("caller", "v1", "Test");

        let err = tokio_test::block_on(sink.write(&record)).unwrap_err();
        assert!(matches!(err, AuditError::Persist(_)));
        assert!(err.to_string().contains("denied"));
    }
}

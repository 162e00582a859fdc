//! Moves logger files from the transient zone into the raw zone.
//!
//! One call to [`TransientRouter::handle`] is one invocation: the event is gated,
//! the object fetched, its header parsed, the destination derived and the object
//! moved. Every invocation ends by writing exactly one audit record, whichever
//! branch it took.

use crate::audit::{AuditRecord, AuditSink};
use crate::config::RoutingConfig;
use crate::error::{Disposition, RouteError};
use crate::event::{Decision, EventGate, EventGridEvent, InboundNotification};
use crate::paths::DestinationKey;
use crate::storage::{ObjectStorage, StorageError};
use crate::toa5::Toa5Extractor;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// How an invocation ended, when it did not fail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    /// Object moved into the raw zone
    Moved { destination: String },
    /// Nothing to do for this event
    Ignored { reason: String },
    /// File content was unusable; recorded as failed in the audit trail only
    Rejected { reason: String },
}

/// Result of a completed invocation
#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    #[serde(flatten)]
    pub outcome: RouteOutcome,
    pub audit_uri: String,
}

pub struct TransientRouter {
    config: Arc<RoutingConfig>,
    gate: EventGate,
    storage: Arc<dyn ObjectStorage>,
    audit_sink: Arc<dyn AuditSink>,
    environment: String,
}

impl TransientRouter {
    pub fn new(
        config: Arc<RoutingConfig>,
        storage: Arc<dyn ObjectStorage>,
        audit_sink: Arc<dyn AuditSink>,
        environment: impl Into<String>,
    ) -> Self {
        let gate = EventGate::new(config.allowed_apis.clone());
        Self {
            config,
            gate,
            storage,
            audit_sink,
            environment: environment.into(),
        }
    }

    /// Run one invocation for a delivered event.
    ///
    /// Malformed headers end the invocation normally with a failed audit record.
    /// Every other error is returned after the audit record is written. A failure
    /// to write the audit record takes precedence over any other result.
    #[instrument(skip(self, event), fields(event_id = %event.id, subject = %event.subject))]
    pub async fn handle(&self, event: &EventGridEvent) -> Result<Invocation, RouteError> {
        metrics::counter!("router.events.received").increment(1);

        let mut audit = AuditRecord::new(
            &self.config.caller_name,
            &self.config.caller_version,
            &self.environment,
        );

        let settled = match self.route(event, &mut audit).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => match e.disposition() {
                Disposition::SoftFail => {
                    audit.log_error(format!("Unable to read file header: {}", e));
                    Ok(RouteOutcome::Rejected {
                        reason: e.to_string(),
                    })
                }
                Disposition::HardFail => {
                    audit.log_error(format!("Exception occurred: {}", e));
                    Err(e)
                }
            },
        };

        let audit_uri = self.finalize(&audit).await?;

        match &settled {
            Ok(RouteOutcome::Moved { .. }) => metrics::counter!("router.events.moved").increment(1),
            Ok(RouteOutcome::Ignored { .. }) => {
                metrics::counter!("router.events.ignored").increment(1)
            }
            Ok(RouteOutcome::Rejected { .. }) => {
                metrics::counter!("router.events.soft_failed").increment(1)
            }
            Err(_) => metrics::counter!("router.events.failed").increment(1),
        }

        settled.map(|outcome| Invocation { outcome, audit_uri })
    }

    /// Run one invocation per event of a delivery, in order.
    ///
    /// A failed event does not stop the ones after it; each result is paired
    /// with its event ID.
    pub async fn handle_batch(
        &self,
        events: &[EventGridEvent],
    ) -> Vec<(String, Result<Invocation, RouteError>)> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push((event.id.clone(), self.handle(event).await));
        }
        results
    }

    async fn finalize(&self, audit: &AuditRecord) -> Result<String, RouteError> {
        info!(audit_id = %audit.id, "Writing EtlEvent");
        let uri = self.audit_sink.write(audit).await?;
        metrics::counter!("router.audit.written").increment(1);
        info!(audit_uri = %uri, "Wrote EtlEvent");
        Ok(uri)
    }

    async fn route(
        &self,
        event: &EventGridEvent,
        audit: &mut AuditRecord,
    ) -> Result<RouteOutcome, RouteError> {
        audit.log_information(format!(
            "EventGridEvent {} ({})",
            event.id,
            event.event_type.as_deref().unwrap_or("unknown")
        ));
        audit.add_input(format!("EventGridEvent.Subject: {}", event.subject));
        audit.log_information(format!("EventGridEvent.Data: {}", event.data));

        let notification = InboundNotification::try_from_event(event)?;

        if let Decision::Ignore { reason } = self.gate.admit(&notification)? {
            return Ok(ignore(audit, reason));
        }

        let object = &notification.object()?;
        if !self.storage.exists(object).await? {
            return Ok(ignore(audit, "Blob does not exist, exiting"));
        }

        audit.log_information("Found blob, downloading content");
        let content = match self.storage.read_all(object).await {
            Ok(content) => content,
            Err(StorageError::NotFound(_)) => {
                return Ok(ignore(audit, "Blob removed before download, exiting"));
            }
            Err(e) => return Err(e.into()),
        };

        audit.log_information(format!("Blob length: {}", content.len()));
        if content.is_empty() {
            return Ok(ignore(audit, "Blob is empty, exiting"));
        }

        let filename = object.filename();
        let metadata =
            Toa5Extractor::new(filename, &content, self.config.utc_offset_hours).extract()?;

        let key = DestinationKey::derive(
            &self.config.project_id,
            &metadata,
            filename,
            &self.config.station_prefix,
        )?;
        let key = key.to_string();
        audit.log_information(format!("Moving blob to {}", key));

        let started = Instant::now();
        let destination = self
            .storage
            .move_object(object, &self.config.output_container, &key)
            .await?;
        metrics::histogram!("router.move.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        audit.log_information("Blob moved");
        audit.add_output(destination.clone());

        Ok(RouteOutcome::Moved { destination })
    }
}

fn ignore(audit: &mut AuditRecord, reason: impl Into<String>) -> RouteOutcome {
    let reason = reason.into();
    audit.log_information(reason.clone());
    RouteOutcome::Ignored { reason }
}

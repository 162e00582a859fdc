//! Inbound storage notifications and the gate that decides whether to act on them.

use crate::error::RouteError;
use crate::storage::ObjectRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Event type emitted when an object is written to the storage account
pub const BLOB_CREATED: &str = "Microsoft.Storage.BlobCreated";

/// Event type of the webhook subscription handshake
pub const SUBSCRIPTION_VALIDATION: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";

/// Event Grid event as delivered on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGridEvent {
    /// Unique event ID
    #[serde(default)]
    pub id: String,
    /// Publisher-defined path to the event subject
    #[serde(default)]
    pub subject: String,
    /// Registered event type
    #[serde(default)]
    pub event_type: Option<String>,
    /// Time the event was generated
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    /// Event payload, shape depends on the event type
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub data_version: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

/// Payload of a blob-created event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobCreatedData {
    api: Option<String>,
    url: Option<String>,
    #[serde(default)]
    content_length: Option<u64>,
}

/// Payload of the subscription handshake
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionValidationData {
    validation_code: String,
}

impl EventGridEvent {
    /// Validation code when this is a subscription handshake event
    pub fn validation_code(&self) -> Option<String> {
        if self.event_type.as_deref() != Some(SUBSCRIPTION_VALIDATION) {
            return None;
        }
        serde_json::from_value::<SubscriptionValidationData>(self.data.clone())
            .ok()
            .map(|d| d.validation_code)
    }
}

/// Validated notification describing a created object
#[derive(Debug, Clone)]
pub struct InboundNotification {
    pub id: String,
    pub subject: String,
    /// Event kind, must be [`BLOB_CREATED`] to proceed
    pub kind: String,
    /// Storage API verb that produced the object
    pub sub_kind: String,
    /// Raw object URL, resolved with [`InboundNotification::object`] once admitted
    pub object_url: String,
    /// Size reported by the publisher, informational only
    pub content_length: Option<u64>,
}

impl InboundNotification {
    /// Build a notification from an untrusted event, checking required fields
    pub fn try_from_event(event: &EventGridEvent) -> Result<Self, RouteError> {
        let kind = event
            .event_type
            .clone()
            .ok_or_else(|| RouteError::Protocol("event has no eventType".to_string()))?;

        let data: BlobCreatedData = serde_json::from_value(event.data.clone())
            .map_err(|e| RouteError::Protocol(format!("event data is not an object: {e}")))?;

        let sub_kind = data
            .api
            .ok_or_else(|| RouteError::Protocol("event data has no api".to_string()))?;
        let object_url = data
            .url
            .ok_or_else(|| RouteError::Protocol("event data has no url".to_string()))?;

        Ok(Self {
            id: event.id.clone(),
            subject: event.subject.clone(),
            kind,
            sub_kind,
            object_url,
            content_length: data.content_length,
        })
    }

    /// Container and object name addressed by the notification
    pub fn object(&self) -> Result<ObjectRef, RouteError> {
        ObjectRef::from_url(&self.object_url).map_err(|e| RouteError::Protocol(e.to_string()))
    }
}

/// Outcome of admitting a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    /// Not an error; the notification is irrelevant to this router
    Ignore { reason: String },
}

/// Checks event kind and write verb before any storage access happens
#[derive(Debug, Clone)]
pub struct EventGate {
    allowed_apis: Vec<String>,
}

impl EventGate {
    pub fn new(allowed_apis: Vec<String>) -> Self {
        Self { allowed_apis }
    }

    /// Reject unexpected event kinds, ignore uncommitted writes, admit the rest
    pub fn admit(&self, notification: &InboundNotification) -> Result<Decision, RouteError> {
        if notification.kind != BLOB_CREATED {
            return Err(RouteError::Protocol(format!(
                "EventType {} not BlobCreated, aborting",
                notification.kind
            )));
        }

        if !self.allowed_apis.iter().any(|api| *api == notification.sub_kind) {
            debug!(api = %notification.sub_kind, "Write not committed");
            return Ok(Decision::Ignore {
                reason: format!(
                    "Event api {} not completely committed, aborting",
                    notification.sub_kind
                ),
            });
        }

        Ok(Decision::Proceed)
    }
}

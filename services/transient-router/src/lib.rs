//! Transient Router
//!
//! Event-triggered routing step of the data lake ingestion pipeline. When a
//! logger data file lands in the transient zone, the router validates the
//! storage event, reads the TOA5 header embedded in the file, derives the
//! file's dataset and year/month partition, and moves it into the raw zone.
//! Every invocation leaves exactly one audit record (EtlEvent) behind.
//!
//! ## Architecture
//!
//! ```text
//! Event Grid / Kafka          Transient zone             Raw zone
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────────────┐
//! │ BlobCreated  │           │ {file}.dat   │          │ {project}/           │
//! │ events       │           └──────────────┘          │   {dataset}/         │
//! └──────────────┘                  │                  │     {yyyy}/{mm}/     │
//!        │                          │ read             │       {file}.dat     │
//!        ▼                          ▼                  └──────────────────────┘
//! ┌──────────────┐           ┌──────────────┐                    ▲
//! │ Event        │──────────▶│ TOA5 header  │                    │ move
//! │ Gate         │           │ extractor    │                    │
//! └──────────────┘           └──────────────┘                    │
//!                                   │                            │
//!                                   ▼                            │
//!                            ┌──────────────┐           ┌──────────────┐
//!                            │ Path         │──────────▶│ Router       │
//!                            │ deriver      │           │              │
//!                            └──────────────┘           └──────────────┘
//!                                                              │ always
//!                                                              ▼
//!                                                       ┌──────────────┐
//!                                                       │ Audit sink   │
//!                                                       └──────────────┘
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod event;
pub mod kafka_consumer;
pub mod paths;
pub mod router;
pub mod storage;
pub mod toa5;
pub mod webhook;

pub use audit::{AuditRecord, AuditSink, ObjectStoreAuditSink, PgAuditSink};
pub use config::Config;
pub use error::{Disposition, RouteError};
pub use event::{Decision, EventGate, EventGridEvent, InboundNotification};
pub use kafka_consumer::EventKafkaConsumer;
pub use paths::{dataset_name, sub_path, DestinationKey, SubPath};
pub use router::{Invocation, RouteOutcome, TransientRouter};
pub use storage::{ObjectRef, ObjectStorage, S3ObjectStorage};
pub use toa5::{LoggerMetadata, Toa5Extractor};
pub use webhook::AppState;

//! `bulkpatch-core`: data model for the batch field-update engine.
//!
//! This crate is **pure**: operations, jobs, batches and per-operation results,
//! plus the invariants that tie them together. Persistence, scheduling and
//! downstream IO live in `bulkpatch-infra`.

pub mod batch;
pub mod error;
pub mod id;
pub mod job;
pub mod operation;
pub mod options;
pub mod result;

pub use batch::{Batch, BatchStatus};
pub use error::{DomainError, DomainResult};
pub use id::{BatchId, JobId};
pub use job::{Job, JobStatus};
pub use operation::{FieldMap, Operation};
pub use options::BatchOptions;
pub use result::{JobResults, OperationOutcome, OperationResult, truncate_message};

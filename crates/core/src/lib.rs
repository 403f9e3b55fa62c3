//! `compiler-core` - job and error primitives for the compiler worker.
//!
//! This crate contains **pure** types (no database, no filesystem).

pub mod error;
pub mod id;
pub mod job;

pub use error::{DatabaseError, JobError, JobResult};
pub use id::{JobId, WorkerId};
pub use job::{Job, JobOutcome, JobPayload, ObjectId};

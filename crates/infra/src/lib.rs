//! Infrastructure layer: job queue, workers, usage and subscription persistence, and the
//! submission service.

pub mod jobs;
pub mod submission;
pub mod subscriptions;
pub mod usage_store;

pub use submission::{QuotaKind, SubmissionError, SubmissionService};

//! `jobgate-auth` — job ownership checks (zero-trust, owner-only access).
//!
//! This crate is intentionally decoupled from HTTP and storage. Callers arrive with an
//! already-verified [`UserId`](jobgate_core::UserId); this crate only decides whether that
//! identity may see a given job.

pub mod access;

pub use access::{AccessDecision, AccessGuard, JobOwnership, OwnershipLookupError, PublicDenial, authorize_owner};

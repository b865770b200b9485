use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use jobgate_core::{JobId, UserId};

/// Message shown to a requester for any job they cannot see.
const UNAVAILABLE_MESSAGE: &str = "job not found";

/// Outcome of an ownership check.
///
/// `Denied` and `NotFound` differ only internally (logging, metrics). Anything shown to the
/// requester must go through [`AccessDecision::public_denial`], which is identical for both.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied,
    NotFound,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }

    /// User-facing denial, or `None` when allowed.
    pub fn public_denial(&self) -> Option<PublicDenial> {
        match self {
            AccessDecision::Allowed => None,
            AccessDecision::Denied | AccessDecision::NotFound => Some(PublicDenial::default()),
        }
    }
}

/// The single user-facing shape for "you cannot see this job".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicDenial {
    pub error: &'static str,
    pub message: &'static str,
}

impl Default for PublicDenial {
    fn default() -> Self {
        Self {
            error: "job_not_found",
            message: UNAVAILABLE_MESSAGE,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OwnershipLookupError {
    #[error("ownership lookup failed: {0}")]
    Storage(String),
}

/// Lookup seam: who owns a job?
///
/// `Ok(None)` means the job was never issued (or is not visible).
pub trait JobOwnership: Send + Sync {
    fn owner_of(&self, job_id: JobId) -> Result<Option<UserId>, OwnershipLookupError>;
}

impl<T: JobOwnership + ?Sized> JobOwnership for Arc<T> {
    fn owner_of(&self, job_id: JobId) -> Result<Option<UserId>, OwnershipLookupError> {
        (**self).owner_of(job_id)
    }
}

/// Pure ownership policy.
///
/// - No IO
/// - No panics
/// - Exact equality only (no group/role sharing)
pub fn authorize_owner(owner: Option<UserId>, requester: UserId) -> AccessDecision {
    match owner {
        None => AccessDecision::NotFound,
        Some(owner) if owner == requester => AccessDecision::Allowed,
        Some(_) => AccessDecision::Denied,
    }
}

/// Gate in front of result retrieval and job-scoped operations.
#[derive(Debug, Clone)]
pub struct AccessGuard<L: JobOwnership> {
    lookup: L,
}

impl<L: JobOwnership> AccessGuard<L> {
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }

    pub fn verify(&self, job_id: JobId, requester: UserId) -> Result<AccessDecision, OwnershipLookupError> {
        let owner = self.lookup.owner_of(job_id)?;
        let decision = authorize_owner(owner, requester);

        if !decision.is_allowed() {
            debug!(job_id = %job_id, requester = %requester, ?decision, "job access refused");
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Owners(HashMap<JobId, UserId>);

    impl JobOwnership for Owners {
        fn owner_of(&self, job_id: JobId) -> Result<Option<UserId>, OwnershipLookupError> {
            Ok(self.0.get(&job_id).copied())
        }
    }

    struct Broken;

    impl JobOwnership for Broken {
        fn owner_of(&self, _job_id: JobId) -> Result<Option<UserId>, OwnershipLookupError> {
            Err(OwnershipLookupError::Storage("unavailable".to_string()))
        }
    }

    #[test]
    fn owner_is_allowed_others_denied() {
        let user_a = UserId::new();
        let user_b = UserId::new();
        let job = JobId::new();
        let guard = AccessGuard::new(Owners(HashMap::from([(job, user_a)])));

        assert_eq!(guard.verify(job, user_a).unwrap(), AccessDecision::Allowed);
        assert_eq!(guard.verify(job, user_b).unwrap(), AccessDecision::Denied);
        assert_eq!(guard.verify(JobId::new(), user_a).unwrap(), AccessDecision::NotFound);
    }

    #[test]
    fn denied_and_not_found_look_identical_to_requester() {
        let denied = AccessDecision::Denied.public_denial().unwrap();
        let missing = AccessDecision::NotFound.public_denial().unwrap();

        assert_eq!(denied, missing);
        assert_eq!(
            serde_json::to_value(&denied).unwrap(),
            serde_json::to_value(&missing).unwrap()
        );
        assert!(AccessDecision::Allowed.public_denial().is_none());
    }

    #[test]
    fn lookup_failure_propagates() {
        let guard = AccessGuard::new(Arc::new(Broken));
        assert!(guard.verify(JobId::new(), UserId::new()).is_err());
    }
}

use jobgate_core::UserId;

/// Identity of the caller for a request.
///
/// Inserted by the identity middleware; present for every job and usage route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequesterContext {
    user_id: UserId,
}

impl RequesterContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

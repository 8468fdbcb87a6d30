use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{ScoreError, UserId};

/// Result of resolving the caller, as handed over by whatever authenticated it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum Identity {
    Authenticated { user_id: UserId },
    Anonymous,
}

impl Identity {
    pub fn authenticated(user_id: UserId) -> Self {
        Identity::Authenticated { user_id }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Identity::Authenticated { user_id } => Some(*user_id),
            Identity::Anonymous => None,
        }
    }

    pub fn require_user(&self) -> Result<UserId, ScoreError> {
        self.user_id().ok_or(ScoreError::Unauthenticated)
    }
}

impl From<Option<UserId>> for Identity {
    fn from(user_id: Option<UserId>) -> Self {
        match user_id {
            Some(user_id) => Identity::Authenticated { user_id },
            None => Identity::Anonymous,
        }
    }
}

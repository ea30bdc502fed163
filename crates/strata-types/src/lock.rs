//! Advisory design lock record.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Holder of a solution design edit session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignLock {
    /// User that acquired the lock.
    #[serde(rename = "userID")]
    pub user_id: String,
    /// When the lock was acquired (UTC, millisecond precision).
    #[serde(rename = "timeStamp")]
    pub time_stamp: DateTime<Utc>,
}

impl DesignLock {
    /// A lock held by `user_id`, stamped now.
    pub fn now(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            time_stamp: Utc::now().trunc_subsecs(3),
        }
    }

    /// True when `user_id` owns this lock.
    pub fn is_held_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

use chrono::{DateTime, Utc};

use crate::models::{Task, User};

/// Emitted after every successful task update, whether or not any field
/// actually changed.
#[derive(Debug, Clone)]
pub struct TaskUpdated {
    pub task: Task,
    pub owner: User,
    /// Deadline as it was before the update was applied.
    pub old_deadline: Option<DateTime<Utc>>,
}

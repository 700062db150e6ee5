use chrono::{DateTime, Utc};
use tracing::debug;

use taskhub_notify::{Notification, Notifier};
use taskhub_types::events::TaskUpdated;
use taskhub_types::models::Task;

use crate::events::TaskUpdatedHandler;

/// Sends the deadline-passed notification when an overdue task is updated.
///
/// Every qualifying update notifies again; `old_deadline` is not consulted.
pub struct DeadlineWatcher {
    notifier: Notifier,
}

impl DeadlineWatcher {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    pub fn should_notify(task: &Task, now: DateTime<Utc>) -> bool {
        task.is_overdue(now)
    }

    /// Returns whether a notification was queued.
    pub fn on_task_updated(&self, event: &TaskUpdated, now: DateTime<Utc>) -> bool {
        if !Self::should_notify(&event.task, now) {
            return false;
        }

        debug!(
            "Task {} is past its deadline, notifying {}",
            event.task.id, event.owner.username
        );
        self.notifier
            .notify(Notification::deadline_passed(&event.task, &event.owner));
        true
    }
}

impl TaskUpdatedHandler for DeadlineWatcher {
    fn handle(&self, event: &TaskUpdated) {
        self.on_task_updated(event, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use taskhub_types::models::{Role, TaskStatus, User};
    use uuid::Uuid;

    fn event(deadline: Option<DateTime<Utc>>) -> TaskUpdated {
        let now = Utc::now();
        let owner = User {
            id: Uuid::new_v4(),
            username: "owner".into(),
            email: "owner@example.com".into(),
            role: Role::User,
            created_at: now,
        };
        TaskUpdated {
            task: Task {
                id: Uuid::new_v4(),
                owner_id: owner.id,
                project_id: None,
                title: "t".into(),
                description: "d".into(),
                status: TaskStatus::Todo,
                deadline,
                created_at: now,
                updated_at: now,
            },
            owner,
            old_deadline: None,
        }
    }

    #[test]
    fn notifies_owner_of_overdue_task() {
        let (notifier, mut queue) = Notifier::channel();
        let watcher = DeadlineWatcher::new(notifier);
        let now = Utc::now();
        let ev = event(Some(now - Duration::days(1)));

        assert!(watcher.on_task_updated(&ev, now));
        let sent = queue.try_recv().unwrap();
        assert_eq!(sent.recipient().id, ev.owner.id);
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn ignores_future_and_missing_deadlines() {
        let (notifier, mut queue) = Notifier::channel();
        let watcher = DeadlineWatcher::new(notifier);
        let now = Utc::now();

        assert!(!watcher.on_task_updated(&event(Some(now + Duration::days(7))), now));
        assert!(!watcher.on_task_updated(&event(None), now));
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn renotifies_on_every_update() {
        let (notifier, mut queue) = Notifier::channel();
        let watcher = DeadlineWatcher::new(notifier);
        let now = Utc::now();
        let mut ev = event(Some(now - Duration::hours(1)));
        ev.old_deadline = ev.task.deadline;

        watcher.handle(&ev);
        watcher.handle(&ev);
        assert!(queue.try_recv().is_some());
        assert!(queue.try_recv().is_some());
    }
}

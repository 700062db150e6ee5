use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mailer::{MailMessage, Mailer};
use crate::notification::{Channel, Notification};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Sending half of the notification queue. Cheap to clone; `notify` never
/// waits on delivery.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

/// Receiving half of the notification queue, drained by [`run_delivery_loop`].
pub struct NotificationQueue {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Notifier {
    pub fn channel() -> (Notifier, NotificationQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Notifier { tx }, NotificationQueue { rx })
    }

    /// Queue a notification for background delivery.
    pub fn notify(&self, notification: Notification) {
        debug!("Queueing notification for user {}", notification.recipient().id);
        if self.tx.send(notification).is_err() {
            warn!("Notification queue closed, dropping notification");
        }
    }
}

impl NotificationQueue {
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Take a queued notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

/// Background task that delivers queued notifications.
///
/// Runs until every [`Notifier`] has been dropped. Delivery failures are
/// logged and the notification is dropped; nothing is reported back to the
/// code that queued it.
pub async fn run_delivery_loop<M: Mailer>(
    mut queue: NotificationQueue,
    mailer: M,
    app_url: String,
) {
    while let Some(notification) = queue.recv().await {
        deliver(&mailer, &notification, &app_url).await;
    }

    info!("Notification queue closed, delivery loop stopping");
}

/// Handle to a spawned [`run_delivery_loop`].
pub struct DeliveryWorker {
    handle: JoinHandle<()>,
}

impl DeliveryWorker {
    pub fn spawn<M: Mailer>(queue: NotificationQueue, mailer: M, app_url: String) -> Self {
        Self {
            handle: tokio::spawn(run_delivery_loop(queue, mailer, app_url)),
        }
    }

    /// Wait for the loop to drain the queue and stop, which happens once every
    /// [`Notifier`] is gone. Returns false if `grace` runs out first; whatever
    /// is still queued is then lost.
    pub async fn finish(self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, self.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Delivery loop ended abnormally: {}", e);
                false
            }
            Err(_) => {
                warn!(
                    "Delivery loop still busy after {:?}, abandoning queued notifications",
                    grace
                );
                false
            }
        }
    }
}

/// Deliver one notification on each of its channels. Returns whether every
/// channel succeeded.
pub async fn deliver<M: Mailer>(mailer: &M, notification: &Notification, app_url: &str) -> bool {
    let mut delivered = true;

    for channel in notification.via() {
        match channel {
            Channel::Mail => {
                let message = notification.to_mail(app_url);
                delivered &= send_with_retry(mailer, &message).await;
            }
        }
    }

    delivered
}

async fn send_with_retry<M: Mailer>(mailer: &M, message: &MailMessage) -> bool {
    for attempt in 1..=MAX_ATTEMPTS {
        match mailer.send(message).await {
            Ok(()) => {
                debug!("Mail '{}' sent to {}", message.subject, message.to);
                return true;
            }
            Err(e) => {
                warn!(
                    "Mail to {} failed (attempt {}/{}): {:#}",
                    message.to, attempt, MAX_ATTEMPTS, e
                );
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::{Duration as ChronoDuration, Utc};
    use taskhub_types::models::{Role, Task, TaskStatus, User};
    use uuid::Uuid;

    /// Fails the first `failures` sends, then records what it is given.
    #[derive(Clone, Default)]
    struct RecordingMailer {
        failures: u32,
        attempts: Arc<AtomicU32>,
        sent: Arc<Mutex<Vec<MailMessage>>>,
    }

    impl Mailer for RecordingMailer {
        async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                anyhow::bail!("relay unavailable");
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn notification() -> Notification {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "owner".into(),
            email: "owner@example.com".into(),
            role: Role::User,
            created_at: now,
        };
        let task = Task {
            id: Uuid::new_v4(),
            owner_id: user.id,
            project_id: None,
            title: "Late".into(),
            description: "d".into(),
            status: TaskStatus::Todo,
            deadline: Some(now - ChronoDuration::hours(1)),
            created_at: now,
            updated_at: now,
        };
        Notification::deadline_passed(&task, &user)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_mailer_succeeds() {
        let mailer = RecordingMailer {
            failures: 2,
            ..Default::default()
        };

        assert!(deliver(&mailer, &notification(), "http://app").await);
        assert_eq!(mailer.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let mailer = RecordingMailer {
            failures: u32::MAX,
            ..Default::default()
        };

        assert!(!deliver(&mailer, &notification(), "http://app").await);
        assert_eq!(mailer.attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn loop_drains_queue_and_stops_when_notifiers_drop() {
        let (notifier, queue) = Notifier::channel();
        let mailer = RecordingMailer::default();

        notifier.notify(notification());
        notifier.notify(notification());
        drop(notifier);

        run_delivery_loop(queue, mailer.clone(), "http://app".into()).await;
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn worker_finishes_once_the_queue_is_drained() {
        let (notifier, queue) = Notifier::channel();
        let mailer = RecordingMailer::default();
        let worker = DeliveryWorker::spawn(queue, mailer.clone(), "http://app".into());

        notifier.notify(notification());
        notifier.notify(notification());
        drop(notifier);

        assert!(worker.finish(Duration::from_secs(5)).await);
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_gives_up_while_a_notifier_is_alive() {
        let (notifier, queue) = Notifier::channel();
        let worker = DeliveryWorker::spawn(queue, RecordingMailer::default(), "http://app".into());

        assert!(!worker.finish(Duration::from_secs(1)).await);
        drop(notifier);
    }

    #[test]
    fn notify_after_queue_dropped_does_not_panic() {
        let (notifier, queue) = Notifier::channel();
        drop(queue);
        notifier.notify(notification());
    }
}

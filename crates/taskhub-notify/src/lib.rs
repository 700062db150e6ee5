pub mod dispatcher;
pub mod mailer;
pub mod notification;

pub use dispatcher::{DeliveryWorker, NotificationQueue, Notifier, run_delivery_loop};
pub use mailer::{LogMailer, MailAction, MailMessage, Mailer, WebhookMailer};
pub use notification::{Channel, Notification};

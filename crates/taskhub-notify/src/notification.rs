use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use taskhub_types::models::{Task, User};

use crate::mailer::{MailAction, MailMessage};

/// Delivery channels a notification can go out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Mail,
}

#[derive(Debug, Clone)]
pub enum Notification {
    /// The recipient's task was updated while its deadline lies in the past.
    DeadlinePassed {
        task_id: Uuid,
        title: String,
        deadline: Option<DateTime<Utc>>,
        recipient: User,
    },
}

impl Notification {
    pub fn deadline_passed(task: &Task, recipient: &User) -> Self {
        Self::DeadlinePassed {
            task_id: task.id,
            title: task.title.clone(),
            deadline: task.deadline,
            recipient: recipient.clone(),
        }
    }

    pub fn recipient(&self) -> &User {
        match self {
            Self::DeadlinePassed { recipient, .. } => recipient,
        }
    }

    pub fn via(&self) -> &'static [Channel] {
        match self {
            Self::DeadlinePassed { .. } => &[Channel::Mail],
        }
    }

    pub fn to_mail(&self, app_url: &str) -> MailMessage {
        match self {
            Self::DeadlinePassed {
                task_id,
                title,
                recipient,
                ..
            } => MailMessage {
                to: recipient.email.clone(),
                subject: "Aufgaben-Deadline überschritten".to_string(),
                lines: vec![
                    format!("Ihre Aufgabe \"{}\" hat die Deadline überschritten.", title),
                    "Bitte aktualisieren Sie die Aufgabe oder kontaktieren Sie Ihren Administrator."
                        .to_string(),
                ],
                action: Some(MailAction {
                    label: "Aufgabe anzeigen".to_string(),
                    url: format!("{}/api/tasks/{}", app_url.trim_end_matches('/'), task_id),
                }),
                data: self.to_payload(),
            },
        }
    }

    /// Structured form, attached to outgoing mail for relays that store or
    /// forward data rather than text.
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            Self::DeadlinePassed {
                task_id,
                title,
                deadline,
                ..
            } => json!({
                "task_id": task_id,
                "title": title,
                "message": "Ihre Aufgabe hat die Deadline überschritten.",
                "deadline": deadline,
            }),
        }
    }
}

use std::future::Future;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailAction {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub lines: Vec<String>,
    pub action: Option<MailAction>,
    /// Notification payload for the relay; not part of the rendered text.
    pub data: serde_json::Value,
}

impl MailMessage {
    /// Plain-text body: the lines in order, with the action after the first line.
    pub fn render_text(&self) -> String {
        let mut out = Vec::with_capacity(self.lines.len() + 1);
        for (i, line) in self.lines.iter().enumerate() {
            out.push(line.clone());
            if i == 0 {
                if let Some(action) = &self.action {
                    out.push(format!("{}: {}", action.label, action.url));
                }
            }
        }
        out.join("\n\n")
    }
}

/// Transport for mail-channel notifications.
pub trait Mailer: Send + Sync + 'static {
    fn send(&self, message: &MailMessage) -> impl Future<Output = Result<()>> + Send;
}

/// Writes mail to the log instead of sending it. Used when no relay is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        info!(to = %message.to, subject = %message.subject, "Mail:\n{}", message.render_text());
        Ok(())
    }
}

/// Hands mail to an HTTP relay as a JSON `MailMessage`, payload included.
#[derive(Debug, Clone)]
pub struct WebhookMailer {
    client: reqwest::Client,
    url: String,
}

impl WebhookMailer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl Mailer for WebhookMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        self.client
            .post(&self.url)
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_places_action_after_first_line() {
        let mail = MailMessage {
            to: "a@example.com".into(),
            subject: "s".into(),
            lines: vec!["first".into(), "last".into()],
            action: Some(MailAction {
                label: "Open".into(),
                url: "http://x/1".into(),
            }),
            data: serde_json::Value::Null,
        };
        assert_eq!(mail.render_text(), "first\n\nOpen: http://x/1\n\nlast");
    }
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

const DEV_SECRET: &str = "dev-secret-change-me";

/// Placeholder JWT secrets that must not reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", DEV_SECRET];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub admin_usernames: Vec<String>,
    /// Base URL used for links in outgoing mail.
    pub app_url: String,
    /// Mail relay endpoint. Mail is only logged when unset.
    pub mail_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match var("TASKHUB_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("TASKHUB_PORT is not a port number: {}", raw))?,
            None => 3000,
        };

        let jwt_secret = var("TASKHUB_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEV_SECRET.into());
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("TASKHUB_JWT_SECRET is unset or a placeholder; tokens are forgeable");
        }

        let admin_usernames = var("TASKHUB_ADMIN_USERNAMES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: var("TASKHUB_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("TASKHUB_DB_PATH")
                .unwrap_or_else(|| "taskhub.db".into())
                .into(),
            jwt_secret,
            admin_usernames,
            app_url: var("TASKHUB_APP_URL").unwrap_or_else(|| "http://localhost:3000".into()),
            mail_webhook_url: var("TASKHUB_MAIL_WEBHOOK_URL").filter(|s| !s.is_empty()),
        })
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::AppConfig;

/// Outbound email seam. The OTP flow is the only sender today; failures are
/// logged by callers and never change the HTTP response shape.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

/// Posts to a transactional-mail HTTP API (JSON body, bearer key).
pub struct HttpApiMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpApiMailer {
    pub fn new(api_url: String, api_key: Option<String>, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            from,
        }
    }

    pub fn from_config(config: &AppConfig) -> Option<Self> {
        config.mail_api_url.as_ref().map(|url| {
            Self::new(
                url.clone(),
                config.mail_api_key.clone(),
                config.mail_from.clone(),
            )
        })
    }
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[async_trait]
impl Mailer for HttpApiMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let message = OutboundMessage {
            from: &self.from,
            to,
            subject,
            html,
        };

        let mut request = self.client.post(&self.api_url).json(&message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("failed to reach mail API")?;
        response
            .error_for_status()
            .context("mail API rejected the message")?;
        Ok(())
    }
}

/// Stands in when no mail API is configured; logs instead of delivering.
/// The message body is withheld so OTP codes never land in logs.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<()> {
        tracing::info!(to = %to, subject = %subject, "mail delivery skipped (no MAIL_API_URL)");
        Ok(())
    }
}

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::MailConfig;

/// Delivers passcodes to the address they were issued for.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_otp(&self, to: &str, code: &str, ttl: Duration) -> anyhow::Result<()>;
}

/// Rendered login email.
#[derive(Debug, Clone, Serialize)]
pub struct OtpEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub fn render_otp_email(code: &str, ttl: Duration) -> OtpEmail {
    let minutes = ttl.as_secs().div_ceil(60).max(1);
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    OtpEmail {
        subject: "Your OTP for Login".into(),
        text: format!("Your OTP is: {code}. This OTP will expire in {minutes} {unit}."),
        html: format!(
            r#"<div style="font-family: Arial, sans-serif; padding: 20px; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #333;">Your OTP for Login</h2>
  <p style="font-size: 16px; color: #666;">Your OTP is:</p>
  <div style="background-color: #f5f5f5; padding: 15px; border-radius: 5px; text-align: center; margin: 20px 0;">
    <span style="font-size: 24px; font-weight: bold; letter-spacing: 5px;">{code}</span>
  </div>
  <p style="font-size: 14px; color: #999;">This OTP will expire in {minutes} {unit}.</p>
</div>"#
        ),
    }
}

#[derive(Serialize)]
struct SendMailBody<'a> {
    from: &'a str,
    to: &'a str,
    #[serde(flatten)]
    email: OtpEmail,
}

/// Sends mail through a transactional-mail HTTP API.
#[derive(Clone)]
pub struct HttpMailer {
    http: Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: Option<String>, from: String) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("recruit-auth")
            .timeout(Duration::from_secs(10))
            .build()
            .context("build mail http client")?;
        Ok(Self {
            http,
            api_url,
            api_key,
            from,
        })
    }

    /// `None` when no mail API is configured.
    pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Option<Self>> {
        cfg.api_url
            .clone()
            .map(|url| Self::new(url, cfg.api_key.clone(), cfg.from.clone()))
            .transpose()
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_otp(&self, to: &str, code: &str, ttl: Duration) -> anyhow::Result<()> {
        let body = SendMailBody {
            from: &self.from,
            to,
            email: render_otp_email(code, ttl),
        };

        let mut req = self.http.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        req.send()
            .await
            .context("mail api request")?
            .error_for_status()
            .context("mail api rejected message")?;

        debug!(to = %to, "otp email accepted by mail api");
        Ok(())
    }
}

/// Development mailer: records that a code went out without revealing it.
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_otp(&self, to: &str, _code: &str, ttl: Duration) -> anyhow::Result<()> {
        info!(to = %to, ttl_secs = ttl.as_secs(), "otp email suppressed (no MAIL_API_URL)");
        Ok(())
    }
}

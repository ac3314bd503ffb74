use std::net::SocketAddr;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("APP_HOST/APP_PORT do not form an address: {}:{}", self.host, self.port))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// OTP lifetime and abuse limits.
#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub ttl_seconds: i64,
    pub max_attempts: u32,
    pub resend_cooldown_seconds: i64,
    pub sweep_interval_seconds: u64,
    /// Demo-only: every issued code equals this value.
    pub fixed_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(var("APP_PORT"), "APP_PORT", 8080)?,
        };
        server.socket_addr()?;

        let jwt = JwtConfig {
            secret: var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: var("JWT_ISSUER").unwrap_or_else(|| "recruit-auth".into()),
            audience: var("JWT_AUDIENCE").unwrap_or_else(|| "recruit-portal".into()),
            ttl_minutes: parse_or(var("JWT_TTL_MINUTES"), "JWT_TTL_MINUTES", 60)?,
        };

        let otp = OtpConfig {
            ttl_seconds: parse_or(var("OTP_TTL_SECONDS"), "OTP_TTL_SECONDS", 300)?,
            max_attempts: parse_or(var("OTP_MAX_ATTEMPTS"), "OTP_MAX_ATTEMPTS", 5)?,
            resend_cooldown_seconds: parse_or(
                var("OTP_RESEND_COOLDOWN_SECONDS"),
                "OTP_RESEND_COOLDOWN_SECONDS",
                30,
            )?,
            sweep_interval_seconds: parse_or(
                var("OTP_SWEEP_INTERVAL_SECONDS"),
                "OTP_SWEEP_INTERVAL_SECONDS",
                60,
            )?,
            fixed_code: var("OTP_FIXED_CODE"),
        };

        if jwt.ttl_minutes < 1 {
            anyhow::bail!("JWT_TTL_MINUTES must be at least 1");
        }
        if otp.ttl_seconds <= 0 {
            anyhow::bail!("OTP_TTL_SECONDS must be positive");
        }
        if otp.max_attempts == 0 {
            anyhow::bail!("OTP_MAX_ATTEMPTS must be at least 1");
        }
        if otp.sweep_interval_seconds == 0 {
            anyhow::bail!("OTP_SWEEP_INTERVAL_SECONDS must be at least 1");
        }
        if otp.resend_cooldown_seconds < 0 {
            anyhow::bail!("OTP_RESEND_COOLDOWN_SECONDS must not be negative");
        }
        if let Some(code) = &otp.fixed_code {
            if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
                anyhow::bail!("OTP_FIXED_CODE must be exactly six digits");
            }
        }

        let mail = MailConfig {
            api_url: var("MAIL_API_URL"),
            api_key: var("MAIL_API_KEY"),
            from: var("MAIL_FROM").unwrap_or_else(|| "no-reply@recruit-portal.local".into()),
        };

        Ok(Self {
            server,
            database_url: var("DATABASE_URL"),
            jwt,
            otp,
            mail,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {v}")),
        None => Ok(default),
    }
}

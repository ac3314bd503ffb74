use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::mailer::{HttpMailer, LogMailer, Mailer};
use crate::otp::repo::{CredentialStore, MemoryStore, PgStore};
use crate::otp::services::{CodeGenerator, FixedCode, OtpPolicy, OtpService, RandomCode};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub otp: Arc<OtpService>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn CredentialStore> = match &config.database_url {
            Some(url) => {
                info!("using postgres credential store");
                Arc::new(PgStore::connect(url).await?)
            }
            None => {
                warn!("DATABASE_URL not set; OTPs are kept in memory and lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let mailer: Arc<dyn Mailer> = match HttpMailer::from_config(&config.mail)? {
            Some(m) => Arc::new(m),
            None => {
                warn!("MAIL_API_URL not set; OTP emails will not be delivered");
                Arc::new(LogMailer)
            }
        };

        let generator: Arc<dyn CodeGenerator> = match &config.otp.fixed_code {
            Some(code) => {
                warn!("OTP_FIXED_CODE is set; every issued OTP is the same value. Never use this in production");
                Arc::new(FixedCode(code.clone()))
            }
            None => Arc::new(RandomCode),
        };

        let otp = Arc::new(OtpService::new(
            store,
            mailer,
            generator,
            OtpPolicy::from(&config.otp),
        ));

        Ok(Self::from_parts(config, otp))
    }

    pub fn from_parts(config: Arc<AppConfig>, otp: Arc<OtpService>) -> Self {
        Self { config, otp }
    }
}

#[cfg(test)]
impl AppState {
    pub const FAKE_CODE: &'static str = "123456";

    /// In-memory store, fixed code, mail swallowed.
    pub fn fake() -> Self {
        use crate::config::{JwtConfig, MailConfig, OtpConfig, ServerConfig};

        let config = Arc::new(AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
            },
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            otp: OtpConfig {
                ttl_seconds: 300,
                max_attempts: 5,
                resend_cooldown_seconds: 30,
                sweep_interval_seconds: 60,
                fixed_code: Some(Self::FAKE_CODE.into()),
            },
            mail: MailConfig {
                api_url: None,
                api_key: None,
                from: "no-reply@test.local".into(),
            },
        });

        let otp = Arc::new(OtpService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LogMailer),
            Arc::new(FixedCode(Self::FAKE_CODE.into())),
            OtpPolicy::from(&config.otp),
        ));

        Self::from_parts(config, otp)
    }
}

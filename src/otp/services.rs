use std::sync::Arc;

use constant_time_eq::constant_time_eq;
use lazy_static::lazy_static;
use rand::{rngs::OsRng, Rng};
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};

use crate::config::OtpConfig;
use crate::mailer::Mailer;
use crate::otp::repo::CredentialStore;
use crate::otp::repo_types::Credential;

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("invalid email address")]
    InvalidIdentifier,
    #[error("no live code for this address")]
    NotFound,
    #[error("code expired")]
    Expired,
    #[error("code mismatch, {remaining} attempt(s) left")]
    Mismatch { remaining: u32 },
    #[error("too many failed attempts")]
    TooManyAttempts,
    #[error("code requested too recently, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("delivery failed: {0}")]
    Delivery(#[source] anyhow::Error),
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Source of fresh passcodes.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Uniform six-digit codes from the OS CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCode;

impl CodeGenerator for RandomCode {
    fn generate(&self) -> String {
        OsRng.gen_range(100_000u32..1_000_000).to_string()
    }
}

/// Always hands out the same code. Demo setups only.
#[derive(Debug, Clone)]
pub struct FixedCode(pub String);

impl CodeGenerator for FixedCode {
    fn generate(&self) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OtpPolicy {
    pub ttl: Duration,
    pub max_attempts: u32,
    pub resend_cooldown: Duration,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(5),
            max_attempts: 5,
            resend_cooldown: Duration::seconds(30),
        }
    }
}

impl From<&OtpConfig> for OtpPolicy {
    fn from(cfg: &OtpConfig) -> Self {
        Self {
            ttl: Duration::seconds(cfg.ttl_seconds),
            max_attempts: cfg.max_attempts,
            resend_cooldown: Duration::seconds(cfg.resend_cooldown_seconds),
        }
    }
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trim + lowercase, then validate.
pub fn normalize_email(raw: &str) -> Result<String, OtpError> {
    let email = raw.trim().to_lowercase();
    if is_valid_email(&email) {
        Ok(email)
    } else {
        Err(OtpError::InvalidIdentifier)
    }
}

/// Issues and redeems one-time passcodes. One instance per process.
pub struct OtpService {
    store: Arc<dyn CredentialStore>,
    mailer: Arc<dyn Mailer>,
    generator: Arc<dyn CodeGenerator>,
    policy: OtpPolicy,
}

impl OtpService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        mailer: Arc<dyn Mailer>,
        generator: Arc<dyn CodeGenerator>,
        policy: OtpPolicy,
    ) -> Self {
        Self {
            store,
            mailer,
            generator,
            policy,
        }
    }

    pub async fn issue(&self, email: &str) -> Result<String, OtpError> {
        self.issue_at(email, OffsetDateTime::now_utc()).await
    }

    /// Generate and record a fresh code, replacing any live one.
    pub async fn issue_at(&self, email: &str, now: OffsetDateTime) -> Result<String, OtpError> {
        let email = normalize_email(email)?;
        let code = self.generator.generate();
        let credential = Credential::new(email.clone(), code.clone(), now);

        if self.policy.resend_cooldown > Duration::ZERO {
            let cutoff = now - self.policy.resend_cooldown;
            if let Some(blocking) = self.store.put_unless_recent(credential, cutoff).await? {
                let wait = self.policy.resend_cooldown - (now - blocking);
                let retry_after_secs = (wait.as_seconds_f64().ceil() as u64).max(1);
                warn!(email = %email, retry_after_secs, "otp requested inside cooldown");
                return Err(OtpError::RateLimited { retry_after_secs });
            }
        } else {
            self.store.put(credential).await?;
        }

        debug!(email = %email, "otp issued");
        Ok(code)
    }

    /// Issue a code and mail it. A code that could not be delivered is withdrawn.
    pub async fn send(&self, email: &str) -> Result<(), OtpError> {
        let email = normalize_email(email)?;
        let code = self.issue(&email).await?;
        let ttl = std::time::Duration::from_secs(self.policy.ttl.whole_seconds().max(0) as u64);

        if let Err(e) = self.mailer.send_otp(&email, &code, ttl).await {
            error!(error = %e, email = %email, "otp delivery failed");
            if let Err(cleanup) = self.store.consume(&email, &code).await {
                error!(error = %cleanup, email = %email, "failed to withdraw undelivered otp");
            }
            return Err(OtpError::Delivery(e));
        }

        info!(email = %email, "otp sent");
        Ok(())
    }

    pub async fn verify(&self, email: &str, candidate: &str) -> Result<String, OtpError> {
        self.verify_at(email, candidate, OffsetDateTime::now_utc()).await
    }

    /// Redeem `candidate` for `email`. Returns the normalized email on success.
    pub async fn verify_at(
        &self,
        email: &str,
        candidate: &str,
        now: OffsetDateTime,
    ) -> Result<String, OtpError> {
        let email = normalize_email(email)?;
        let candidate = candidate.trim();

        let credential = self.store.get(&email).await?.ok_or(OtpError::NotFound)?;

        // Every write below is conditioned on `credential.code` so a concurrent
        // reissue is never touched.
        if credential.is_expired(now, self.policy.ttl) {
            self.store.consume(&email, &credential.code).await?;
            debug!(email = %email, "otp expired");
            return Err(OtpError::Expired);
        }

        if !constant_time_eq(credential.code.as_bytes(), candidate.as_bytes()) {
            let attempts = self
                .store
                .record_failure(&email, &credential.code)
                .await?
                .ok_or(OtpError::NotFound)?;
            let used = attempts.max(0) as u32;
            if used >= self.policy.max_attempts {
                self.store.consume(&email, &credential.code).await?;
                warn!(email = %email, attempts = used, "otp locked out");
                return Err(OtpError::TooManyAttempts);
            }
            debug!(email = %email, attempts = used, "otp mismatch");
            return Err(OtpError::Mismatch {
                remaining: self.policy.max_attempts - used,
            });
        }

        // Lost a race with a reissue or another redemption.
        if !self.store.consume(&email, &credential.code).await? {
            return Err(OtpError::NotFound);
        }

        info!(email = %email, "otp verified");
        Ok(email)
    }

    pub async fn purge_expired(&self) -> Result<u64, OtpError> {
        self.purge_expired_at(OffsetDateTime::now_utc()).await
    }

    pub async fn purge_expired_at(&self, now: OffsetDateTime) -> Result<u64, OtpError> {
        Ok(self.store.purge_issued_before(now - self.policy.ttl).await?)
    }
}

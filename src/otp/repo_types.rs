use sqlx::FromRow;
use time::{Duration, OffsetDateTime};

/// Live one-time passcode held for an email address.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Credential {
    pub email: String,              // normalized identifier, primary key
    pub code: String,               // six decimal digits
    pub issued_at: OffsetDateTime,  // issuance instant (UTC)
    pub attempts: i32,              // failed verification attempts so far
}

impl Credential {
    pub fn new(email: String, code: String, issued_at: OffsetDateTime) -> Self {
        Self {
            email,
            code,
            issued_at,
            attempts: 0,
        }
    }

    /// A code is still valid at exactly `ttl` after issuance.
    pub fn is_expired(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        now - self.issued_at > ttl
    }
}

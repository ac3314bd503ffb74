use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::info;

use crate::otp::repo_types::Credential;

/// Storage boundary for live credentials, one per email.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace the credential for `credential.email`.
    async fn put(&self, credential: Credential) -> anyhow::Result<()>;
    /// Like `put`, but refuses when the live record was issued after `cutoff`.
    /// Returns the blocking record's `issued_at` on refusal.
    async fn put_unless_recent(
        &self,
        credential: Credential,
        cutoff: OffsetDateTime,
    ) -> anyhow::Result<Option<OffsetDateTime>>;
    async fn get(&self, email: &str) -> anyhow::Result<Option<Credential>>;
    /// Bump the failure counter of the record holding `code`.
    /// `None` when that record is gone or was replaced.
    async fn record_failure(&self, email: &str, code: &str) -> anyhow::Result<Option<i32>>;
    /// Delete the record only if it still holds `code`.
    async fn consume(&self, email: &str, code: &str) -> anyhow::Result<bool>;
    async fn purge_issued_before(&self, cutoff: OffsetDateTime) -> anyhow::Result<u64>;
}

/// Process-local store; contents vanish on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_map<R>(&self, f: impl FnOnce(&mut HashMap<String, Credential>) -> R) -> anyhow::Result<R> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("credential store mutex poisoned"))?;
        Ok(f(&mut *map))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn put(&self, credential: Credential) -> anyhow::Result<()> {
        self.with_map(|m| {
            m.insert(credential.email.clone(), credential);
        })
    }

    async fn put_unless_recent(
        &self,
        credential: Credential,
        cutoff: OffsetDateTime,
    ) -> anyhow::Result<Option<OffsetDateTime>> {
        self.with_map(|m| {
            let blocking = m
                .get(&credential.email)
                .map(|c| c.issued_at)
                .filter(|issued_at| *issued_at > cutoff);
            if blocking.is_none() {
                m.insert(credential.email.clone(), credential);
            }
            blocking
        })
    }

    async fn get(&self, email: &str) -> anyhow::Result<Option<Credential>> {
        self.with_map(|m| m.get(email).cloned())
    }

    async fn record_failure(&self, email: &str, code: &str) -> anyhow::Result<Option<i32>> {
        self.with_map(|m| {
            m.get_mut(email).filter(|c| c.code == code).map(|c| {
                c.attempts += 1;
                c.attempts
            })
        })
    }

    async fn consume(&self, email: &str, code: &str) -> anyhow::Result<bool> {
        self.with_map(|m| {
            let matches = m.get(email).is_some_and(|c| c.code == code);
            if matches {
                m.remove(email);
            }
            matches
        })
    }

    async fn purge_issued_before(&self, cutoff: OffsetDateTime) -> anyhow::Result<u64> {
        self.with_map(|m| {
            let before = m.len();
            m.retain(|_, c| c.issued_at >= cutoff);
            (before - m.len()) as u64
        })
    }
}

/// PostgreSQL-backed store over the `otp_credentials` table.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to postgres")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;
        info!("credential store migrations applied");

        Ok(Self { db })
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn put(&self, credential: Credential) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO otp_credentials (email, code, issued_at, attempts)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET code = EXCLUDED.code,
                issued_at = EXCLUDED.issued_at,
                attempts = EXCLUDED.attempts
            "#,
        )
        .bind(&credential.email)
        .bind(&credential.code)
        .bind(credential.issued_at)
        .bind(credential.attempts)
        .execute(&self.db)
        .await
        .context("upsert otp credential")?;
        Ok(())
    }

    async fn put_unless_recent(
        &self,
        credential: Credential,
        cutoff: OffsetDateTime,
    ) -> anyhow::Result<Option<OffsetDateTime>> {
        let stored = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO otp_credentials (email, code, issued_at, attempts)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET code = EXCLUDED.code,
                issued_at = EXCLUDED.issued_at,
                attempts = EXCLUDED.attempts
            WHERE otp_credentials.issued_at <= $5
            RETURNING email
            "#,
        )
        .bind(&credential.email)
        .bind(&credential.code)
        .bind(credential.issued_at)
        .bind(credential.attempts)
        .bind(cutoff)
        .fetch_optional(&self.db)
        .await
        .context("conditional upsert otp credential")?;

        if stored.is_some() {
            return Ok(None);
        }

        // Refused: report when the blocking code was issued.
        let blocking = sqlx::query_scalar::<_, OffsetDateTime>(
            r#"SELECT issued_at FROM otp_credentials WHERE email = $1"#,
        )
        .bind(&credential.email)
        .fetch_optional(&self.db)
        .await
        .context("select blocking otp credential")?;
        Ok(Some(blocking.unwrap_or(cutoff)))
    }

    async fn get(&self, email: &str) -> anyhow::Result<Option<Credential>> {
        let credential = sqlx::query_as::<_, Credential>(
            r#"
            SELECT email, code, issued_at, attempts
            FROM otp_credentials
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("select otp credential")?;
        Ok(credential)
    }

    async fn record_failure(&self, email: &str, code: &str) -> anyhow::Result<Option<i32>> {
        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE otp_credentials
            SET attempts = attempts + 1
            WHERE email = $1 AND code = $2
            RETURNING attempts
            "#,
        )
        .bind(email)
        .bind(code)
        .fetch_optional(&self.db)
        .await
        .context("record otp failure")?;
        Ok(attempts)
    }

    async fn consume(&self, email: &str, code: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(r#"DELETE FROM otp_credentials WHERE email = $1 AND code = $2"#)
            .bind(email)
            .bind(code)
            .execute(&self.db)
            .await
            .context("consume otp credential")?;
        Ok(res.rows_affected() == 1)
    }

    async fn purge_issued_before(&self, cutoff: OffsetDateTime) -> anyhow::Result<u64> {
        let res = sqlx::query(r#"DELETE FROM otp_credentials WHERE issued_at < $1"#)
            .bind(cutoff)
            .execute(&self.db)
            .await
            .context("purge expired otp credentials")?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn cred(email: &str, code: &str, issued_at: OffsetDateTime) -> Credential {
        Credential::new(email.into(), code.into(), issued_at)
    }

    #[tokio::test]
    async fn put_overwrites_previous_record() {
        let store = MemoryStore::new();
        let t = datetime!(2026-01-01 00:00:00 UTC);
        store.put(cred("a@b.com", "111111", t)).await.unwrap();
        store.record_failure("a@b.com", "111111").await.unwrap();
        store.put(cred("a@b.com", "222222", t)).await.unwrap();

        let got = store.get("a@b.com").await.unwrap().unwrap();
        assert_eq!(got.code, "222222");
        assert_eq!(got.attempts, 0);
    }

    #[tokio::test]
    async fn consume_requires_matching_code() {
        let store = MemoryStore::new();
        let t = datetime!(2026-01-01 00:00:00 UTC);
        store.put(cred("a@b.com", "111111", t)).await.unwrap();

        assert!(!store.consume("a@b.com", "999999").await.unwrap());
        assert!(store.get("a@b.com").await.unwrap().is_some());
        assert!(store.consume("a@b.com", "111111").await.unwrap());
        assert!(store.get("a@b.com").await.unwrap().is_none());
        assert!(!store.consume("a@b.com", "111111").await.unwrap());
    }

    #[tokio::test]
    async fn record_failure_counts_up_and_ignores_missing() {
        let store = MemoryStore::new();
        let t = datetime!(2026-01-01 00:00:00 UTC);
        assert_eq!(store.record_failure("nobody@b.com", "111111").await.unwrap(), None);

        store.put(cred("a@b.com", "111111", t)).await.unwrap();
        assert_eq!(store.record_failure("a@b.com", "111111").await.unwrap(), Some(1));
        assert_eq!(store.record_failure("a@b.com", "111111").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn record_failure_skips_replaced_code() {
        let store = MemoryStore::new();
        let t = datetime!(2026-01-01 00:00:00 UTC);
        store.put(cred("a@b.com", "222222", t)).await.unwrap();

        assert_eq!(store.record_failure("a@b.com", "111111").await.unwrap(), None);
        assert_eq!(store.get("a@b.com").await.unwrap().unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn put_unless_recent_checks_and_writes_atomically() {
        let store = MemoryStore::new();
        let t = datetime!(2026-01-01 00:00:00 UTC);
        let cutoff = datetime!(2025-12-31 23:59:30 UTC);

        assert_eq!(
            store
                .put_unless_recent(cred("a@b.com", "111111", t), cutoff)
                .await
                .unwrap(),
            None
        );

        // live record issued after the cutoff blocks the write
        let refused = store
            .put_unless_recent(cred("a@b.com", "222222", t), cutoff)
            .await
            .unwrap();
        assert_eq!(refused, Some(t));
        assert_eq!(store.get("a@b.com").await.unwrap().unwrap().code, "111111");

        // once the cutoff passes the record it is replaced
        let later = datetime!(2026-01-01 00:00:30 UTC);
        assert_eq!(
            store
                .put_unless_recent(cred("a@b.com", "333333", later), t)
                .await
                .unwrap(),
            None
        );
        assert_eq!(store.get("a@b.com").await.unwrap().unwrap().code, "333333");
    }

    #[tokio::test]
    async fn purge_drops_only_older_records() {
        let store = MemoryStore::new();
        store
            .put(cred("old@b.com", "111111", datetime!(2026-01-01 00:00:00 UTC)))
            .await
            .unwrap();
        store
            .put(cred("new@b.com", "222222", datetime!(2026-01-01 00:10:00 UTC)))
            .await
            .unwrap();

        let removed = store
            .purge_issued_before(datetime!(2026-01-01 00:05:00 UTC))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("old@b.com").await.unwrap().is_none());
        assert!(store.get("new@b.com").await.unwrap().is_some());
    }
}

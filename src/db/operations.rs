use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::db::models::{Identity, IdentityRow, OtpRecord, RefreshTokenRecord, Role};
use crate::db::store::{IdentityStore, OtpStore, RefreshTokenStore};
use crate::error::{AppError, DatabaseError};
use crate::Result;

const IDENTITY_COLUMNS: &str =
    "id, name, phone_number, username, password_digest, role, created_by, created_at";

/// PostgreSQL-backed implementation of every store trait.
#[derive(Clone)]
pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| AppError::DatabaseError(DatabaseError::ConnectionError(e.to_string())))?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &Arc<PgPool> {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn get_pool_status(&self) -> DbPoolStatus {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        DbPoolStatus {
            total_connections: size,
            active_connections: size.saturating_sub(idle),
            idle_connections: idle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbPoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
}

#[async_trait]
impl IdentityStore for DbOperations {
    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM identities WHERE id = $1",
            IDENTITY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Identity::try_from).transpose()
    }

    async fn find_identity_by_phone(&self, phone_number: &str) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM identities WHERE phone_number = $1",
            IDENTITY_COLUMNS
        ))
        .bind(phone_number)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Identity::try_from).transpose()
    }

    async fn find_identity_by_username(&self, username: &str, role: Role) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM identities WHERE username = $1 AND role = $2",
            IDENTITY_COLUMNS
        ))
        .bind(username)
        .bind(role.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Identity::try_from).transpose()
    }

    async fn count_identities_by_role(&self, role: Role) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identities WHERE role = $1")
            .bind(role.as_str())
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(count)
    }

    async fn count_identities_by_username(&self, username: &str, role: Role) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM identities WHERE username = $1 AND role = $2",
        )
        .bind(username)
        .bind(role.as_str())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn insert_identity(&self, identity: &Identity) -> Result<Identity> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            r#"
            INSERT INTO identities (id, name, phone_number, username, password_digest, role, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            IDENTITY_COLUMNS
        ))
        .bind(identity.id)
        .bind(&identity.name)
        .bind(&identity.phone_number)
        .bind(&identity.username)
        .bind(&identity.password_digest)
        .bind(identity.role.as_str())
        .bind(identity.created_by)
        .bind(identity.created_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        Identity::try_from(row)
    }
}

#[async_trait]
impl OtpStore for DbOperations {
    async fn upsert_otp(&self, record: &OtpRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO otp_records (phone_number, code, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (phone_number)
            DO UPDATE SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at, created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&record.phone_number)
        .bind(&record.code)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn find_otp(&self, phone_number: &str) -> Result<Option<OtpRecord>> {
        let record = sqlx::query_as::<_, OtpRecord>(
            "SELECT phone_number, code, expires_at, created_at FROM otp_records WHERE phone_number = $1",
        )
        .bind(phone_number)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(record)
    }

    async fn delete_stale_otp(&self, record: &OtpRecord) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM otp_records WHERE phone_number = $1 AND code = $2 AND expires_at = $3",
        )
        .bind(&record.phone_number)
        .bind(&record.code)
        .bind(record.expires_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn consume_otp(&self, phone_number: &str, code: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM otp_records WHERE phone_number = $1 AND code = $2")
            .bind(phone_number)
            .bind(code)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired_otps(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM otp_records WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RefreshTokenStore for DbOperations {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, token, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(&record.token)
        .bind(record.user_id)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn consume_refresh_token(&self, token: &str, user_id: Uuid) -> Result<Option<RefreshTokenRecord>> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            DELETE FROM refresh_tokens
            WHERE token = $1 AND user_id = $2
            RETURNING id, token, user_id, expires_at, created_at
            "#,
        )
        .bind(token)
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(record)
    }

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut transaction = self.pool.as_ref().begin().await?;

        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *transaction)
            .await;

        match result {
            Ok(result) => {
                transaction.commit().await?;
                Ok(result.rows_affected())
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    // Runs only against a disposable database named by TEST_DATABASE_URL.
    async fn setup_test_db() -> Option<DbOperations> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("Failed to connect to test database");
        let db = DbOperations::new(Arc::new(pool));
        db.migrate().await.expect("Failed to run migrations");
        Some(db)
    }

    async fn cleanup_test_db(db: &DbOperations, phone_number: &str) {
        sqlx::query("DELETE FROM otp_records WHERE phone_number = $1")
            .bind(phone_number)
            .execute(db.pool().as_ref())
            .await
            .unwrap();
        sqlx::query("DELETE FROM identities WHERE phone_number = $1")
            .bind(phone_number)
            .execute(db.pool().as_ref())
            .await
            .unwrap();
    }

    fn unique_phone() -> String {
        let digits: String = Uuid::new_v4()
            .as_u128()
            .to_string()
            .chars()
            .take(12)
            .collect();
        format!("+{}", digits)
    }

    #[tokio::test]
    async fn test_pool_status() {
        let Some(db) = setup_test_db().await else { return };
        let status = db.get_pool_status();
        assert!(status.total_connections >= status.idle_connections);
        assert_eq!(status.active_connections, status.total_connections - status.idle_connections);
    }

    #[tokio::test]
    async fn test_otp_upsert_and_conditional_consume() {
        let Some(db) = setup_test_db().await else { return };
        let phone = unique_phone();

        db.upsert_otp(&OtpRecord::new(phone.clone(), "111111".into(), ChronoDuration::minutes(2)))
            .await
            .unwrap();
        db.upsert_otp(&OtpRecord::new(phone.clone(), "222222".into(), ChronoDuration::minutes(2)))
            .await
            .unwrap();

        let stored = db.find_otp(&phone).await.unwrap().unwrap();
        assert_eq!(stored.code, "222222");

        assert!(!db.consume_otp(&phone, "111111").await.unwrap());
        assert!(db.consume_otp(&phone, "222222").await.unwrap());
        assert!(!db.consume_otp(&phone, "222222").await.unwrap());
        assert!(db.find_otp(&phone).await.unwrap().is_none());

        cleanup_test_db(&db, &phone).await;
    }

    #[tokio::test]
    async fn test_stale_otp_delete_matches_exact_record() {
        let Some(db) = setup_test_db().await else { return };
        let phone = unique_phone();

        db.upsert_otp(&OtpRecord::new(phone.clone(), "111111".into(), ChronoDuration::minutes(-1)))
            .await
            .unwrap();
        let stale = db.find_otp(&phone).await.unwrap().unwrap();
        db.upsert_otp(&OtpRecord::new(phone.clone(), "222222".into(), ChronoDuration::minutes(2)))
            .await
            .unwrap();

        assert!(!db.delete_stale_otp(&stale).await.unwrap());
        let current = db.find_otp(&phone).await.unwrap().unwrap();
        assert_eq!(current.code, "222222");
        assert!(db.delete_stale_otp(&current).await.unwrap());

        cleanup_test_db(&db, &phone).await;
    }

    #[tokio::test]
    async fn test_refresh_token_consumed_once() {
        let Some(db) = setup_test_db().await else { return };
        let phone = unique_phone();
        let user = db
            .insert_identity(&Identity::new_user("Ava".into(), phone.clone()))
            .await
            .unwrap();

        let token = format!("token-{}", Uuid::new_v4());
        let record = RefreshTokenRecord::new(token.clone(), user.id, Utc::now() + ChronoDuration::hours(1));
        db.insert_refresh_token(&record).await.unwrap();

        assert!(db.consume_refresh_token(&token, Uuid::new_v4()).await.unwrap().is_none());
        let (first, second) = tokio::join!(
            db.consume_refresh_token(&token, user.id),
            db.consume_refresh_token(&token, user.id)
        );
        let winners = [first.unwrap(), second.unwrap()]
            .into_iter()
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1);

        // Cascades to any remaining refresh tokens.
        cleanup_test_db(&db, &phone).await;
    }

    #[tokio::test]
    async fn test_unique_violation_maps_to_duplicate() {
        let Some(db) = setup_test_db().await else { return };
        let phone = unique_phone();

        let first = db
            .insert_identity(&Identity::new_user("Ava".into(), phone.clone()))
            .await
            .unwrap();
        assert_eq!(first.role, Role::User);
        assert_eq!(db.find_identity_by_phone(&phone).await.unwrap().unwrap().id, first.id);

        let err = db
            .insert_identity(&Identity::new_user("Bella".into(), phone.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DatabaseError(DatabaseError::Duplicate(_))));

        cleanup_test_db(&db, &phone).await;
    }
}

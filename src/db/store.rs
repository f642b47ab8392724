//! Persistence seams consumed by the authentication service.
//!
//! Each trait covers one collection. Implementations must enforce uniqueness
//! of phone numbers and usernames themselves and report violations as
//! `DatabaseError::Duplicate`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{Identity, OtpRecord, RefreshTokenRecord, Role};
use crate::Result;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>>;

    async fn find_identity_by_phone(&self, phone_number: &str) -> Result<Option<Identity>>;

    async fn find_identity_by_username(&self, username: &str, role: Role) -> Result<Option<Identity>>;

    async fn count_identities_by_role(&self, role: Role) -> Result<i64>;

    async fn count_identities_by_username(&self, username: &str, role: Role) -> Result<i64>;

    async fn insert_identity(&self, identity: &Identity) -> Result<Identity>;
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Replaces any outstanding record for the same phone number.
    async fn upsert_otp(&self, record: &OtpRecord) -> Result<()>;

    async fn find_otp(&self, phone_number: &str) -> Result<Option<OtpRecord>>;

    /// Deletes `record` only if it is still the stored one, so a code
    /// reissued in the meantime survives. Returns whether this call removed it.
    async fn delete_stale_otp(&self, record: &OtpRecord) -> Result<bool>;

    /// Deletes the record only if it still holds `code`. Returns whether this
    /// call removed it.
    async fn consume_otp(&self, phone_number: &str, code: &str) -> Result<bool>;

    async fn delete_expired_otps(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<()>;

    /// Atomically removes and returns the record matching both token and user.
    /// At most one concurrent caller observes `Some`.
    async fn consume_refresh_token(&self, token: &str, user_id: Uuid) -> Result<Option<RefreshTokenRecord>>;

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64>;
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{Identity, OtpRecord, RefreshTokenRecord, Role};
use crate::db::store::{IdentityStore, OtpStore, RefreshTokenStore};
use crate::error::DatabaseError;
use crate::Result;

/// In-process store with the same uniqueness and single-use guarantees as
/// the PostgreSQL backend. Used for tests and local runs without a database.
#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<HashMap<Uuid, Identity>>,
    otps: RwLock<HashMap<String, OtpRecord>>,
    refresh_tokens: RwLock<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refresh_token_count(&self, user_id: Uuid) -> usize {
        self.refresh_tokens
            .read()
            .await
            .values()
            .filter(|record| record.user_id == user_id)
            .count()
    }

    pub async fn remove_identity(&self, id: Uuid) -> Option<Identity> {
        self.identities.write().await.remove(&id)
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_identity_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        Ok(self.identities.read().await.get(&id).cloned())
    }

    async fn find_identity_by_phone(&self, phone_number: &str) -> Result<Option<Identity>> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .find(|identity| identity.phone_number.as_deref() == Some(phone_number))
            .cloned())
    }

    async fn find_identity_by_username(&self, username: &str, role: Role) -> Result<Option<Identity>> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .find(|identity| identity.username.as_deref() == Some(username) && identity.role == role)
            .cloned())
    }

    async fn count_identities_by_role(&self, role: Role) -> Result<i64> {
        let identities = self.identities.read().await;
        Ok(identities.values().filter(|identity| identity.role == role).count() as i64)
    }

    async fn count_identities_by_username(&self, username: &str, role: Role) -> Result<i64> {
        let identities = self.identities.read().await;
        Ok(identities
            .values()
            .filter(|identity| identity.username.as_deref() == Some(username) && identity.role == role)
            .count() as i64)
    }

    async fn insert_identity(&self, identity: &Identity) -> Result<Identity> {
        let mut identities = self.identities.write().await;

        for existing in identities.values() {
            if identity.phone_number.is_some() && existing.phone_number == identity.phone_number {
                return Err(DatabaseError::Duplicate("identities_phone_number_key".into()).into());
            }
            if identity.username.is_some() && existing.username == identity.username {
                return Err(DatabaseError::Duplicate("identities_username_key".into()).into());
            }
        }
        if identities.contains_key(&identity.id) {
            return Err(DatabaseError::Duplicate("identities_pkey".into()).into());
        }

        identities.insert(identity.id, identity.clone());
        Ok(identity.clone())
    }
}

#[async_trait]
impl OtpStore for MemoryStore {
    async fn upsert_otp(&self, record: &OtpRecord) -> Result<()> {
        self.otps
            .write()
            .await
            .insert(record.phone_number.clone(), record.clone());
        Ok(())
    }

    async fn find_otp(&self, phone_number: &str) -> Result<Option<OtpRecord>> {
        Ok(self.otps.read().await.get(phone_number).cloned())
    }

    async fn delete_stale_otp(&self, record: &OtpRecord) -> Result<bool> {
        let mut otps = self.otps.write().await;
        match otps.get(&record.phone_number) {
            Some(stored) if stored.code == record.code && stored.expires_at == record.expires_at => {
                otps.remove(&record.phone_number);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_otp(&self, phone_number: &str, code: &str) -> Result<bool> {
        let mut otps = self.otps.write().await;
        match otps.get(phone_number) {
            Some(record) if record.code == code => {
                otps.remove(phone_number);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_expired_otps(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut otps = self.otps.write().await;
        let before = otps.len();
        otps.retain(|_, record| !record.is_expired_at(now));
        Ok((before - otps.len()) as u64)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<()> {
        let mut tokens = self.refresh_tokens.write().await;
        if tokens.contains_key(&record.token) {
            return Err(DatabaseError::Duplicate("refresh_tokens_token_key".into()).into());
        }
        tokens.insert(record.token.clone(), record.clone());
        Ok(())
    }

    async fn consume_refresh_token(&self, token: &str, user_id: Uuid) -> Result<Option<RefreshTokenRecord>> {
        let mut tokens = self.refresh_tokens.write().await;
        match tokens.get(token) {
            Some(record) if record.user_id == user_id => Ok(tokens.remove(token)),
            _ => Ok(None),
        }
    }

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tokens = self.refresh_tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, record| !record.is_expired_at(now));
        Ok((before - tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use chrono::Duration;

    #[tokio::test]
    async fn test_otp_upsert_overwrites() {
        let store = MemoryStore::new();
        store
            .upsert_otp(&OtpRecord::new("+15550001".into(), "111111".into(), Duration::minutes(2)))
            .await
            .unwrap();
        store
            .upsert_otp(&OtpRecord::new("+15550001".into(), "222222".into(), Duration::minutes(2)))
            .await
            .unwrap();

        let record = store.find_otp("+15550001").await.unwrap().unwrap();
        assert_eq!(record.code, "222222");
        assert!(!store.consume_otp("+15550001", "111111").await.unwrap());
        assert!(store.consume_otp("+15550001", "222222").await.unwrap());
        assert!(!store.consume_otp("+15550001", "222222").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_otp_delete_spares_reissued_code() {
        let store = MemoryStore::new();
        let stale = OtpRecord::new("+15550001".into(), "111111".into(), Duration::minutes(-1));
        store.upsert_otp(&stale).await.unwrap();
        store
            .upsert_otp(&OtpRecord::new("+15550001".into(), "222222".into(), Duration::minutes(2)))
            .await
            .unwrap();

        assert!(!store.delete_stale_otp(&stale).await.unwrap());
        assert_eq!(store.find_otp("+15550001").await.unwrap().unwrap().code, "222222");

        let current = store.find_otp("+15550001").await.unwrap().unwrap();
        assert!(store.delete_stale_otp(&current).await.unwrap());
        assert!(store.find_otp("+15550001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_phone_rejected() {
        let store = MemoryStore::new();
        store
            .insert_identity(&Identity::new_user("Ava".into(), "+15550001".into()))
            .await
            .unwrap();

        let err = store
            .insert_identity(&Identity::new_user("Bella".into(), "+15550001".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DatabaseError(DatabaseError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_refresh_token_consumed_once() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let record = RefreshTokenRecord::new("tok".into(), user_id, Utc::now() + Duration::hours(1));
        store.insert_refresh_token(&record).await.unwrap();

        assert!(store.consume_refresh_token("tok", Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.consume_refresh_token("tok", user_id).await.unwrap().is_some());
        assert!(store.consume_refresh_token("tok", user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .insert_refresh_token(&RefreshTokenRecord::new("old".into(), user_id, Utc::now() - Duration::seconds(1)))
            .await
            .unwrap();
        store
            .insert_refresh_token(&RefreshTokenRecord::new("new".into(), user_id, Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        store
            .upsert_otp(&OtpRecord::new("+15550002".into(), "123456".into(), Duration::minutes(-1)))
            .await
            .unwrap();

        assert_eq!(store.delete_expired_refresh_tokens(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.delete_expired_otps(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.refresh_token_count(user_id).await, 1);
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    MiniAdmin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::MiniAdmin => "mini-admin",
            Role::User => "user",
        }
    }

    pub fn is_administrative(&self) -> bool {
        matches!(self, Role::Admin | Role::MiniAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "mini-admin" => Ok(Role::MiniAdmin),
            "user" => Ok(Role::User),
            other => Err(AppError::DatabaseError(DatabaseError::CorruptRecord(format!(
                "unknown role '{}'",
                other
            )))),
        }
    }
}

/// A stored principal: a phone-number user or a username/password administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Uuid,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub username: Option<String>,
    #[serde(skip)]
    pub password_digest: Option<String>,
    pub role: Role,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new_user(name: String, phone_number: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: Some(name),
            phone_number: Some(phone_number),
            username: None,
            password_digest: None,
            role: Role::User,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn new_administrator(
        username: String,
        password_digest: String,
        role: Role,
        created_by: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            phone_number: None,
            username: Some(username),
            password_digest: Some(password_digest),
            role,
            created_by,
            created_at: Utc::now(),
        }
    }
}

/// Row shape of the `identities` table; `role` is validated on conversion.
#[derive(Debug, FromRow)]
pub struct IdentityRow {
    pub id: Uuid,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub username: Option<String>,
    pub password_digest: Option<String>,
    pub role: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = AppError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            phone_number: row.phone_number,
            username: row.username,
            password_digest: row.password_digest,
            role: row.role.parse()?,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OtpRecord {
    pub phone_number: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl OtpRecord {
    pub fn new(phone_number: String, code: String, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            phone_number,
            code,
            expires_at: now + lifetime,
            created_at: now,
        }
    }

    /// A record is dead from `expires_at` onwards, deleted or not.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(token: String, user_id: Uuid, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            user_id,
            expires_at,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Admin, Role::MiniAdmin, Role::User] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            assert_eq!(serde_json::to_value(role).unwrap(), role.as_str());
        }
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn test_identity_hides_password_digest() {
        let admin = Identity::new_administrator(
            "root_admin".into(),
            "$argon2id$v=19$...".into(),
            Role::Admin,
            None,
        );
        let json = serde_json::to_value(&admin).unwrap();
        assert!(json.get("passwordDigest").is_none());
        assert_eq!(json["username"], "root_admin");
        assert_eq!(json["role"], "admin");
    }

    #[test]
    fn test_otp_expiry_boundary() {
        let record = OtpRecord::new("+15550001".into(), "123456".into(), Duration::minutes(2));
        assert!(!record.is_expired_at(record.created_at));
        assert!(record.is_expired_at(record.expires_at));
        assert!(record.is_expired_at(record.expires_at + Duration::seconds(1)));
    }
}

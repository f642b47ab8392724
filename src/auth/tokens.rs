use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::models::Role;
use crate::error::{AppError, AuthError};
use crate::Result;

const ACCESS_TOKEN_LIFETIME_HOURS: i64 = 1;

/// Discriminates token kinds so one kind is never accepted as another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
    Admin,
}

trait TokenClaims: DeserializeOwned {
    fn token_use(&self) -> TokenUse;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub token_use: TokenUse,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub token_use: TokenUse,
    pub jti: Uuid,
    pub exp: i64,
    pub iat: i64,
}

impl RefreshClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleClaims {
    pub sub: Uuid,
    pub role: Role,
    pub token_use: TokenUse,
    pub exp: i64,
    pub iat: i64,
}

impl TokenClaims for AccessClaims {
    fn token_use(&self) -> TokenUse {
        self.token_use
    }
}

impl TokenClaims for RefreshClaims {
    fn token_use(&self) -> TokenUse {
        self.token_use
    }
}

impl TokenClaims for RoleClaims {
    fn token_use(&self) -> TokenUse {
        self.token_use
    }
}

/// A freshly minted refresh token and its embedded expiry.
#[derive(Debug, Clone)]
pub struct MintedRefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies HS256 tokens. Access and administrative tokens share
/// the access secret; refresh tokens use their own.
#[derive(Clone)]
pub struct TokenSigner {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    refresh_lifetime: Duration,
    admin_lifetime: Duration,
}

impl TokenSigner {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        refresh_lifetime: Duration,
        admin_lifetime: Duration,
    ) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_lifetime,
            admin_lifetime,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            &config.access_token_secret,
            &config.refresh_token_secret,
            Duration::hours(config.refresh_token_lifetime_hours),
            Duration::hours(config.admin_token_lifetime_hours),
        )
    }

    pub fn mint_access(&self, identity_id: Uuid) -> Result<String> {
        self.mint_access_at(identity_id, Utc::now())
    }

    pub fn mint_access_at(&self, identity_id: Uuid, issued_at: DateTime<Utc>) -> Result<String> {
        let claims = AccessClaims {
            sub: identity_id,
            token_use: TokenUse::Access,
            exp: (issued_at + Duration::hours(ACCESS_TOKEN_LIFETIME_HOURS)).timestamp(),
            iat: issued_at.timestamp(),
        };
        sign(&claims, &self.access_encoding)
    }

    pub fn mint_refresh(&self, identity_id: Uuid) -> Result<MintedRefreshToken> {
        self.mint_refresh_at(identity_id, Utc::now())
    }

    pub fn mint_refresh_at(&self, identity_id: Uuid, issued_at: DateTime<Utc>) -> Result<MintedRefreshToken> {
        let claims = RefreshClaims {
            sub: identity_id,
            token_use: TokenUse::Refresh,
            jti: Uuid::new_v4(),
            exp: (issued_at + self.refresh_lifetime).timestamp(),
            iat: issued_at.timestamp(),
        };
        let token = sign(&claims, &self.refresh_encoding)?;
        Ok(MintedRefreshToken {
            token,
            expires_at: claims.expires_at(),
        })
    }

    /// Role-bearing token for administrative identities.
    pub fn mint_role(&self, identity_id: Uuid, role: Role) -> Result<String> {
        self.mint_role_at(identity_id, role, Utc::now())
    }

    pub fn mint_role_at(&self, identity_id: Uuid, role: Role, issued_at: DateTime<Utc>) -> Result<String> {
        let claims = RoleClaims {
            sub: identity_id,
            role,
            token_use: TokenUse::Admin,
            exp: (issued_at + self.admin_lifetime).timestamp(),
            iat: issued_at.timestamp(),
        };
        sign(&claims, &self.access_encoding)
    }

    pub fn verify_access(&self, token: &str) -> Result<Uuid> {
        let claims: AccessClaims = verify(token, &self.access_decoding, TokenUse::Access)?;
        Ok(claims.sub)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims> {
        verify(token, &self.refresh_decoding, TokenUse::Refresh)
    }

    pub fn verify_role(&self, token: &str) -> Result<RoleClaims> {
        verify(token, &self.access_decoding, TokenUse::Admin)
    }
}

fn sign<T: Serialize>(claims: &T, key: &EncodingKey) -> Result<String> {
    encode(&Header::new(Algorithm::HS256), claims, key)
        .map_err(|e| AppError::InternalError(format!("Failed to sign token: {}", e)))
}

// Signature, algorithm, expiry and kind failures all collapse into
// `AuthError::InvalidToken`.
fn verify<T: TokenClaims>(token: &str, key: &DecodingKey, expected: TokenUse) -> Result<T> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let claims = decode::<T>(token, key, &validation)?.claims;
    if claims.token_use() != expected {
        return Err(AuthError::InvalidToken.into());
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("access_secret", "refresh_secret", Duration::hours(720), Duration::hours(24))
    }

    fn assert_invalid(result: Result<impl std::fmt::Debug>) {
        match result {
            Err(AppError::AuthError(AuthError::InvalidToken)) => (),
            other => panic!("Expected invalid token, got {:?}", other),
        }
    }

    #[test]
    fn test_access_round_trip() {
        let id = Uuid::new_v4();
        let token = signer().mint_access(id).unwrap();
        assert_eq!(signer().verify_access(&token).unwrap(), id);
    }

    #[test]
    fn test_refresh_round_trip() {
        let id = Uuid::new_v4();
        let minted = signer().mint_refresh(id).unwrap();
        let claims = signer().verify_refresh(&minted.token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.expires_at(), minted.expires_at);

        let expires_in = claims.exp - Utc::now().timestamp();
        assert!(expires_in > 719 * 3600);
        assert!(expires_in <= 720 * 3600);
    }

    #[test]
    fn test_refresh_tokens_are_distinct() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let a = signer().mint_refresh_at(id, now).unwrap();
        let b = signer().mint_refresh_at(id, now).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_wrong_secret() {
        let other = TokenSigner::new("other_access", "other_refresh", Duration::hours(1), Duration::hours(1));
        let id = Uuid::new_v4();

        assert_invalid(other.verify_access(&signer().mint_access(id).unwrap()));
        assert_invalid(other.verify_refresh(&signer().mint_refresh(id).unwrap().token));
    }

    #[test]
    fn test_expired_tokens() {
        let id = Uuid::new_v4();
        let two_hours_ago = Utc::now() - Duration::hours(2);
        assert_invalid(signer().verify_access(&signer().mint_access_at(id, two_hours_ago).unwrap()));

        let long_ago = Utc::now() - Duration::hours(721);
        assert_invalid(signer().verify_refresh(&signer().mint_refresh_at(id, long_ago).unwrap().token));

        let yesterday = Utc::now() - Duration::hours(25);
        assert_invalid(signer().verify_role(&signer().mint_role_at(id, Role::Admin, yesterday).unwrap()));
    }

    #[test]
    fn test_kinds_are_not_interchangeable() {
        let same = TokenSigner::new("shared", "shared", Duration::hours(1), Duration::hours(1));
        let id = Uuid::new_v4();

        let access = same.mint_access(id).unwrap();
        let refresh = same.mint_refresh(id).unwrap().token;
        let admin = same.mint_role(id, Role::Admin).unwrap();

        assert_invalid(same.verify_refresh(&access));
        assert_invalid(same.verify_role(&access));
        assert_invalid(same.verify_access(&refresh));
        assert_invalid(same.verify_access(&admin));
    }

    #[test]
    fn test_unsupported_algorithm_rejected() {
        let claims = AccessClaims {
            sub: Uuid::new_v4(),
            token_use: TokenUse::Access,
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
            iat: Utc::now().timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"access_secret"),
        )
        .unwrap();

        assert_invalid(signer().verify_access(&token));
    }

    #[test]
    fn test_garbage_rejected() {
        assert_invalid(signer().verify_access("not.a.token"));
        assert_invalid(signer().verify_refresh(""));
    }

    #[test]
    fn test_role_claim_preserved() {
        let id = Uuid::new_v4();
        let token = signer().mint_role(id, Role::MiniAdmin).unwrap();
        let claims = signer().verify_role(&token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, Role::MiniAdmin);
    }
}

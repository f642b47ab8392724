use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::otp;
use crate::auth::password::PasswordService;
use crate::auth::tokens::{RoleClaims, TokenSigner};
use crate::config::{AuthConfig, DEFAULT_ADMIN_PASSWORD};
use crate::db::models::{Identity, OtpRecord, RefreshTokenRecord, Role};
use crate::db::store::{IdentityStore, OtpStore, RefreshTokenStore};
use crate::error::{AppError, AuthError, DatabaseError};
use crate::sms::SmsSender;
use crate::Result;

const USERNAME_MIN_LEN: usize = 5;
const USERNAME_MAX_LEN: usize = 20;
const PASSWORD_MIN_LEN: usize = 6;

/// The three persistence collections the service works against.
#[derive(Clone)]
pub struct Stores {
    pub identities: Arc<dyn IdentityStore>,
    pub otps: Arc<dyn OtpStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
}

impl Stores {
    /// Uses one backend for every collection.
    pub fn single<S>(backend: Arc<S>) -> Self
    where
        S: IdentityStore + OtpStore + RefreshTokenStore + 'static,
    {
        Self {
            identities: backend.clone(),
            otps: backend.clone(),
            refresh_tokens: backend,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OtpIssued {
    pub is_new_user_flow: bool,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub identity: Identity,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access_token: String,
    /// `None` when the rotated token could not be persisted.
    pub refresh_token: Option<String>,
    pub identity: Identity,
}

#[derive(Debug, Clone)]
pub struct AdminLoginOutcome {
    pub token: String,
    pub identity: Identity,
}

/// Sequences OTP issuance and verification, identity resolution, and token
/// issuance and rotation.
pub struct AuthService {
    stores: Stores,
    sms: Arc<dyn SmsSender>,
    passwords: Arc<dyn PasswordService>,
    tokens: TokenSigner,
    otp_lifetime_minutes: i64,
}

impl AuthService {
    pub fn new(
        stores: Stores,
        sms: Arc<dyn SmsSender>,
        passwords: Arc<dyn PasswordService>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            stores,
            sms,
            passwords,
            tokens: TokenSigner::from_config(config),
            otp_lifetime_minutes: config.otp_lifetime_minutes,
        }
    }

    pub fn tokens(&self) -> &TokenSigner {
        &self.tokens
    }

    pub async fn issue_otp(&self, phone_number: &str, name: Option<&str>) -> Result<OtpIssued> {
        let phone_number = validate_phone_number(phone_number)?;
        let name = normalize_name(name);

        let existing = self.stores.identities.find_identity_by_phone(phone_number).await?;
        match (&existing, name) {
            (Some(_), Some(_)) => {
                return Err(AppError::Conflict(
                    "User with this phone number already exists".into(),
                ));
            }
            (None, None) => {
                return Err(AppError::ValidationError(
                    "Name is required for new user signup".into(),
                ));
            }
            _ => {}
        }

        let code = otp::generate_code();
        let record = OtpRecord::new(
            phone_number.to_string(),
            code.clone(),
            Duration::minutes(self.otp_lifetime_minutes),
        );
        self.stores.otps.upsert_otp(&record).await?;
        info!(phone_number, "OTP stored");

        let body = otp::sms_body(&code, self.otp_lifetime_minutes);
        if let Err(e) = self.sms.send(phone_number, &body).await {
            error!(phone_number, error = %e, "Failed to send OTP via SMS");
            return Err(e.into());
        }
        info!(phone_number, "OTP SMS sent");

        Ok(OtpIssued {
            is_new_user_flow: existing.is_none(),
        })
    }

    pub async fn verify_otp(
        &self,
        phone_number: &str,
        code: &str,
        name: Option<&str>,
    ) -> Result<LoginOutcome> {
        let phone_number = validate_phone_number(phone_number)?;
        let code = code.trim();
        if code.is_empty() {
            return Err(AppError::ValidationError("OTP is required".into()));
        }
        let name = normalize_name(name);

        let now = Utc::now();
        let record = match self.stores.otps.find_otp(phone_number).await? {
            Some(record) if !record.is_expired_at(now) => record,
            Some(stale) => {
                if let Err(e) = self.stores.otps.delete_stale_otp(&stale).await {
                    warn!(phone_number, error = %e, "Failed to delete stale OTP");
                }
                return Err(AuthError::OtpExpiredOrInvalid.into());
            }
            None => return Err(AuthError::OtpExpiredOrInvalid.into()),
        };

        if record.code != code {
            warn!(phone_number, "Invalid OTP provided");
            return Err(AuthError::InvalidOtp.into());
        }

        // A concurrent verification may have consumed the record first.
        if !self.stores.otps.consume_otp(phone_number, code).await? {
            return Err(AuthError::OtpExpiredOrInvalid.into());
        }

        let identity = self.resolve_phone_identity(phone_number, name).await?;
        let (access_token, refresh_token) = self.issue_token_pair(identity.id).await?;

        info!(phone_number, user_id = %identity.id, "User verified via OTP");
        Ok(LoginOutcome {
            access_token,
            refresh_token,
            identity,
        })
    }

    async fn resolve_phone_identity(&self, phone_number: &str, name: Option<&str>) -> Result<Identity> {
        if let Some(existing) = self.stores.identities.find_identity_by_phone(phone_number).await? {
            if let Some(name) = name {
                if existing.name.as_deref() != Some(name) {
                    return Err(AppError::Conflict(
                        "User with this phone number already exists with a different name".into(),
                    ));
                }
            }
            return Ok(existing);
        }

        let name = name.ok_or_else(|| {
            AppError::ValidationError("Name required for new user registration".into())
        })?;

        let identity = Identity::new_user(name.to_string(), phone_number.to_string());
        match self.stores.identities.insert_identity(&identity).await {
            Ok(created) => {
                info!(phone_number, user_id = %created.id, "New user registered");
                Ok(created)
            }
            Err(AppError::DatabaseError(DatabaseError::Duplicate(_))) => Err(AppError::Conflict(
                "User with this phone number already exists".into(),
            )),
            Err(e) => Err(e),
        }
    }

    async fn issue_token_pair(&self, identity_id: Uuid) -> Result<(String, String)> {
        let access_token = self.tokens.mint_access(identity_id)?;
        let refresh_token = self.persist_new_refresh_token(identity_id).await?;
        Ok((access_token, refresh_token))
    }

    async fn persist_new_refresh_token(&self, identity_id: Uuid) -> Result<String> {
        let minted = self.tokens.mint_refresh(identity_id)?;
        let record = RefreshTokenRecord::new(minted.token.clone(), identity_id, minted.expires_at);
        self.stores.refresh_tokens.insert_refresh_token(&record).await?;
        Ok(minted.token)
    }

    /// Redeems a refresh token exactly once and rotates it.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome> {
        if refresh_token.is_empty() {
            return Err(AppError::ValidationError("Refresh token is required".into()));
        }

        let claims = self.tokens.verify_refresh(refresh_token).map_err(|e| {
            warn!(error = %e, "Invalid refresh token provided");
            e
        })?;
        let user_id = claims.sub;

        // The record is gone once this returns, whatever happens next.
        let stored = self
            .stores
            .refresh_tokens
            .consume_refresh_token(refresh_token, user_id)
            .await?
            .ok_or_else(|| {
                warn!(%user_id, "Refresh token not found or already used");
                AppError::AuthError(AuthError::RefreshTokenRevoked)
            })?;

        if stored.is_expired_at(Utc::now()) {
            warn!(%user_id, "Stored refresh token has expired");
            return Err(AuthError::RefreshTokenExpired.into());
        }

        let identity = self
            .stores
            .identities
            .find_identity_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        let access_token = self.tokens.mint_access(identity.id)?;

        let refresh_token = match self.persist_new_refresh_token(identity.id).await {
            Ok(token) => Some(token),
            Err(e) => {
                error!(user_id = %identity.id, error = %e, "Failed to store rotated refresh token");
                None
            }
        };

        info!(user_id = %identity.id, "Tokens refreshed");
        Ok(RefreshOutcome {
            access_token,
            refresh_token,
            identity,
        })
    }

    /// Consumes a refresh token without issuing a replacement. Already
    /// consumed tokens are accepted silently.
    pub async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<()> {
        if refresh_token.is_empty() {
            return Err(AppError::ValidationError("Refresh token is required".into()));
        }
        let claims = self.tokens.verify_refresh(refresh_token)?;

        if self
            .stores
            .refresh_tokens
            .consume_refresh_token(refresh_token, claims.sub)
            .await?
            .is_some()
        {
            info!(user_id = %claims.sub, "Refresh token revoked");
        }
        Ok(())
    }

    pub async fn profile(&self, identity_id: Uuid) -> Result<Identity> {
        self.stores
            .identities
            .find_identity_by_id(identity_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))
    }

    /// Username/password login for `admin` and `mini-admin` identities.
    pub async fn admin_login(&self, username: &str, password: &str, role: Role) -> Result<AdminLoginOutcome> {
        if !role.is_administrative() {
            return Err(AppError::ValidationError("Role does not support password login".into()));
        }
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AppError::ValidationError("Username and password are required".into()));
        }

        let identity = self
            .stores
            .identities
            .find_identity_by_username(username, role)
            .await?
            .ok_or_else(|| {
                warn!(username, %role, "Administrative login for unknown user");
                AppError::AuthError(AuthError::InvalidCredentials)
            })?;

        let digest = identity
            .password_digest
            .as_deref()
            .ok_or(AppError::AuthError(AuthError::InvalidCredentials))?;

        if !self.passwords.verify(password, digest)? {
            warn!(username, %role, "Administrative login with wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let token = self.tokens.mint_role(identity.id, identity.role)?;
        info!(username, %role, "Administrative login successful");
        Ok(AdminLoginOutcome { token, identity })
    }

    /// Creates a `mini-admin` on behalf of the admin presenting `admin_token`.
    pub async fn create_mini_admin(&self, admin_token: &str, username: &str, password: &str) -> Result<Identity> {
        let claims: RoleClaims = self.tokens.verify_role(admin_token)?;
        if claims.role != Role::Admin {
            warn!(user_id = %claims.sub, role = %claims.role, "Non-admin attempted to create mini-admin");
            return Err(AppError::Forbidden("Only Admin can perform this action".into()));
        }

        let username = validate_username(username)?;
        if password.len() < PASSWORD_MIN_LEN {
            return Err(AppError::ValidationError(format!(
                "Password must be at least {} characters",
                PASSWORD_MIN_LEN
            )));
        }

        let creator = self
            .stores
            .identities
            .find_identity_by_id(claims.sub)
            .await?
            .ok_or_else(|| AppError::NotFound("Admin not found".into()))?;
        if creator.role != Role::Admin {
            return Err(AppError::Forbidden("Only Admin can create Mini-Admin".into()));
        }

        if self
            .stores
            .identities
            .count_identities_by_username(username, Role::MiniAdmin)
            .await?
            > 0
        {
            return Err(AppError::Conflict("Mini-Admin with this username already exists".into()));
        }

        let digest = self.passwords.hash(password)?;
        let mini_admin = Identity::new_administrator(
            username.to_string(),
            digest,
            Role::MiniAdmin,
            Some(creator.id),
        );

        let created = match self.stores.identities.insert_identity(&mini_admin).await {
            Ok(created) => created,
            Err(AppError::DatabaseError(DatabaseError::Duplicate(_))) => {
                return Err(AppError::Conflict("Username already exists".into()));
            }
            Err(e) => {
                error!(username, error = %e, "Failed to create Mini-Admin");
                return Err(e);
            }
        };

        info!(username, created_by = %creator.id, "Mini-Admin created");
        Ok(created)
    }

    /// Creates the bootstrap admin unless an `admin` identity already exists.
    /// Returns whether one was created.
    pub async fn ensure_bootstrap_admin(&self, username: &str, password: &str) -> Result<bool> {
        if self.stores.identities.count_identities_by_role(Role::Admin).await? > 0 {
            info!("Admin already exists, skipping seed");
            return Ok(false);
        }

        if password == DEFAULT_ADMIN_PASSWORD {
            warn!("Bootstrap admin uses the placeholder password; set APP_AUTH__ADMIN_PASSWORD");
        }

        let digest = self.passwords.hash(password)?;
        let admin = Identity::new_administrator(username.to_string(), digest, Role::Admin, None);
        match self.stores.identities.insert_identity(&admin).await {
            Ok(created) => {
                info!(username, user_id = %created.id, "Bootstrap admin created");
                Ok(true)
            }
            // Another instance seeded concurrently.
            Err(AppError::DatabaseError(DatabaseError::Duplicate(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Deletes OTP and refresh-token records whose expiry has passed.
    pub async fn purge_expired(&self) -> Result<(u64, u64)> {
        let now = Utc::now();
        let otps = self.stores.otps.delete_expired_otps(now).await?;
        let refresh_tokens = self.stores.refresh_tokens.delete_expired_refresh_tokens(now).await?;
        Ok((otps, refresh_tokens))
    }
}

fn validate_phone_number(phone_number: &str) -> Result<&str> {
    let phone_number = phone_number.trim();
    let digits = phone_number.strip_prefix('+').unwrap_or(phone_number);
    let valid = (6..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());
    if valid {
        Ok(phone_number)
    } else {
        Err(AppError::ValidationError("Invalid phone number".into()))
    }
}

fn normalize_name(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|name| !name.is_empty())
}

fn validate_username(username: &str) -> Result<&str> {
    let username = username.trim();
    let valid = (USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(username)
    } else {
        Err(AppError::ValidationError(format!(
            "Username must be {}-{} characters of letters, digits, '.', '_' or '-'",
            USERNAME_MIN_LEN, USERNAME_MAX_LEN
        )))
    }
}

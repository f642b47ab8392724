//! Authentication module
//!
//! OTP issuance and verification for phone-number users, username/password
//! login for administrators, and access/refresh token lifecycle.

pub mod extractors;
pub mod handlers;
pub mod otp;
pub mod password;
mod service;
pub mod tokens;

pub use extractors::{AuthenticatedUser, BearerToken};
pub use password::{Argon2Passwords, PasswordService};
pub use service::{AdminLoginOutcome, AuthService, LoginOutcome, OtpIssued, RefreshOutcome, Stores};
pub use tokens::{AccessClaims, RefreshClaims, RoleClaims, TokenSigner, TokenUse};

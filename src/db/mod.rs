//! Database module
//!
//! Store traits for identities, OTP records and refresh tokens, with a
//! PostgreSQL implementation and an in-memory one.

pub mod memory;
pub mod models;
pub mod operations;
pub mod store;

pub use memory::MemoryStore;
pub use models::{Identity, OtpRecord, RefreshTokenRecord, Role};
pub use operations::{DbOperations, DbPoolStatus};
pub use store::{IdentityStore, OtpStore, RefreshTokenStore};

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod sms;

use std::sync::Arc;
use std::time::Duration;
use actix_web::{web, HttpResponse};
use tracing::{error, info};

pub use error::{AppError, ErrorKind};
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::{Argon2Passwords, AuthService, Stores, TokenSigner};
pub use db::{DbOperations, Identity, MemoryStore, Role};
pub use sms::{SmsSender, TwilioSmsSender};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let database = state.db.as_ref().map(|db| {
        let status = db.get_pool_status();
        serde_json::json!({
            "totalConnections": status.total_connections,
            "activeConnections": status.active_connections,
            "idleConnections": status.idle_connections,
        })
    });

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "database": database,
    }))
}

/// Registers the health route and every authentication route.
pub fn configure_app(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .configure(auth::handlers::configure_routes);
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    db: Option<DbOperations>,
}

impl AppState {
    /// Connects to PostgreSQL, applies migrations and wires the Twilio sender.
    pub async fn new(config: Settings) -> Result<Self> {
        let db = DbOperations::new_with_options(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await?;
        db.migrate().await?;

        let sms = TwilioSmsSender::new(&config.sms)?;
        let auth_service = AuthService::new(
            Stores::single(Arc::new(db.clone())),
            Arc::new(sms),
            Arc::new(Argon2Passwords),
            &config.auth,
        );

        Ok(Self {
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            db: Some(db),
        })
    }

    /// State around an already-built service, with no database pool.
    pub fn with_auth_service(config: Settings, auth_service: AuthService) -> Self {
        Self {
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            db: None,
        }
    }

    pub async fn seed_admin(&self) -> Result<bool> {
        let auth = &self.config.auth;
        self.auth_service
            .ensure_bootstrap_admin(&auth.admin_username, &auth.admin_password)
            .await
    }

    /// Periodically deletes expired OTP and refresh-token records.
    pub fn spawn_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        let service = self.auth_service.clone();
        let interval = Duration::from_secs(self.config.maintenance.cleanup_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match service.purge_expired().await {
                    Ok((0, 0)) => {}
                    Ok((otps, refresh_tokens)) => {
                        info!(otps, refresh_tokens, "Purged expired records");
                    }
                    Err(e) => error!(error = %e, "Expired record cleanup failed"),
                }
            }
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(db) = &self.db {
            db.pool().close().await;
        }
        Ok(())
    }
}

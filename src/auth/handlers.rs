use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::extractors::{AuthenticatedUser, BearerToken};
use crate::db::models::{Identity, Role};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpRequest {
    pub phone_number: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpResponse {
    pub message: String,
    pub is_new_user_flow: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub phone_number: String,
    pub otp: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub message: String,
    pub access_token: String,
    pub refresh_token: String,
    pub user: Identity,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub message: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub user: Identity,
}

#[derive(Debug, Deserialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminLoginResponse {
    pub message: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub username: String,
    pub token: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct MiniAdminCreatedResponse {
    pub message: String,
    pub username: String,
    pub password: String,
    pub role: Role,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/auth/send-otp", web::post().to(send_otp))
        .route("/auth/verify-otp", web::post().to(verify_otp))
        .route("/auth/refresh", web::post().to(refresh))
        .route("/auth/logout", web::post().to(logout))
        .route("/admin/login", web::post().to(admin_login))
        .route("/mini-admin/login", web::post().to(mini_admin_login))
        .route("/admin/create-mini-admin", web::post().to(create_mini_admin))
        .route("/api/profile", web::get().to(profile));
}

pub async fn send_otp(
    req: web::Json<SendOtpRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!(phone_number = %req.phone_number, "Received send-otp request");
    let issued = state
        .auth_service
        .issue_otp(&req.phone_number, req.name.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(SendOtpResponse {
        message: "OTP sent successfully".to_string(),
        is_new_user_flow: issued.is_new_user_flow,
    }))
}

pub async fn verify_otp(
    req: web::Json<VerifyOtpRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!(phone_number = %req.phone_number, "Received verify-otp request");
    let outcome = state
        .auth_service
        .verify_otp(&req.phone_number, &req.otp, req.name.as_deref())
        .await?;

    let role = outcome.identity.role;
    Ok(HttpResponse::Ok().json(AuthResponse {
        message: "User successfully verified".to_string(),
        access_token: outcome.access_token,
        refresh_token: outcome.refresh_token,
        user: outcome.identity,
        role,
    }))
}

pub async fn refresh(
    req: web::Json<RefreshRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let outcome = state.auth_service.refresh(&req.refresh_token).await?;

    Ok(HttpResponse::Ok().json(RefreshResponse {
        message: "Tokens refreshed successfully".to_string(),
        access_token: outcome.access_token,
        refresh_token: outcome.refresh_token,
        user: outcome.identity,
    }))
}

pub async fn logout(
    req: web::Json<RefreshRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.revoke_refresh_token(&req.refresh_token).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Successfully logged out"
    })))
}

pub async fn admin_login(
    req: web::Json<AdminCredentials>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    administrative_login(req.into_inner(), state, Role::Admin).await
}

pub async fn mini_admin_login(
    req: web::Json<AdminCredentials>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    administrative_login(req.into_inner(), state, Role::MiniAdmin).await
}

async fn administrative_login(
    req: AdminCredentials,
    state: web::Data<AppState>,
    role: Role,
) -> Result<HttpResponse, AppError> {
    info!(username = %req.username, %role, "Received administrative login request");
    let outcome = state
        .auth_service
        .admin_login(&req.username, &req.password, role)
        .await?;

    Ok(HttpResponse::Ok().json(AdminLoginResponse {
        message: "Login successful".to_string(),
        user_id: outcome.identity.id.to_string(),
        username: outcome.identity.username.unwrap_or_default(),
        token: outcome.token,
        role: outcome.identity.role,
    }))
}

pub async fn create_mini_admin(
    token: BearerToken,
    req: web::Json<AdminCredentials>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let created = state
        .auth_service
        .create_mini_admin(&token.0, &req.username, &req.password)
        .await
        .map_err(|e| {
            warn!(username = %req.username, error = %e, "Mini-Admin creation rejected");
            e
        })?;

    let req = req.into_inner();
    Ok(HttpResponse::Ok().json(MiniAdminCreatedResponse {
        message: "Mini-Admin created successfully!".to_string(),
        username: created.username.unwrap_or(req.username),
        password: req.password,
        role: created.role,
    }))
}

pub async fn profile(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let identity = state.auth_service.profile(user.0).await?;
    Ok(HttpResponse::Ok().json(identity))
}

//! Route handlers.

use crate::AppState;
use crate::auth::Admin;
use crate::error::{ApiError, Result};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use bastion_license::{
    CreateLicense, Grant, License, LicensePatch, RejectReason, User, VerificationResult,
    VerifyRequest,
};
use bastion_types::LicenseId;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Body of every `/api/verify` response.
///
/// A refused key is still a 200; `valid` and `reason` carry the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<Grant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl From<VerificationResult> for VerifyResponse {
    fn from(result: VerificationResult) -> Self {
        let status = result.code().to_string();
        match result {
            VerificationResult::Valid { grant, .. } => Self {
                valid: true,
                status,
                license: Some(grant),
                reason: None,
            },
            VerificationResult::Rejected(reason) => Self {
                valid: false,
                status,
                license: None,
                reason: Some(reason),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUser {
    pub username: String,
    pub is_admin: bool,
}

/// Body returned by a successful admin login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: AdminUser,
}

#[derive(Serialize)]
pub(crate) struct LicenseBody {
    license: License,
}

#[derive(Serialize)]
pub(crate) struct LicensesBody {
    licenses: Vec<License>,
}

#[derive(Serialize)]
pub(crate) struct UserBody {
    user: User,
}

#[derive(Serialize)]
pub(crate) struct DeletedBody {
    success: bool,
}

#[derive(Deserialize)]
pub(crate) struct CreateUserRequest {
    username: String,
    #[serde(default)]
    email: Option<String>,
}

fn license_id(raw: &str) -> Result<LicenseId> {
    LicenseId::parse(raw).map_err(|_| ApiError::NotFound(format!("license {raw}")))
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub(crate) async fn verify(
    State(state): State<AppState>,
    body: std::result::Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>> {
    let Json(request) = body?;
    let result = state.service.verify_license(&request)?;
    debug!(outcome = result.code(), "verify request served");
    Ok(Json(result.into()))
}

pub(crate) async fn login(
    State(state): State<AppState>,
    body: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    let Json(request) = body?;
    let username = request.username.trim();
    if username.is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest(
            "username and password are required".into(),
        ));
    }

    let token = state
        .auth
        .login(username, &request.password)
        .ok_or(ApiError::Unauthorized)?;
    Ok(Json(LoginResponse {
        token,
        user: AdminUser {
            username: username.to_string(),
            is_admin: true,
        },
    }))
}

pub(crate) async fn list_licenses(
    _admin: Admin,
    State(state): State<AppState>,
) -> Result<Json<LicensesBody>> {
    let licenses = state.service.list_licenses()?;
    Ok(Json(LicensesBody { licenses }))
}

pub(crate) async fn create_license(
    _admin: Admin,
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateLicense>, JsonRejection>,
) -> Result<(StatusCode, Json<LicenseBody>)> {
    let Json(request) = body?;
    let license = state.service.create_license(&request)?;
    Ok((StatusCode::CREATED, Json(LicenseBody { license })))
}

pub(crate) async fn get_license(
    _admin: Admin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LicenseBody>> {
    let license = state.service.get_license(&license_id(&id)?)?;
    Ok(Json(LicenseBody { license }))
}

pub(crate) async fn update_license(
    _admin: Admin,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<LicensePatch>, JsonRejection>,
) -> Result<Json<LicenseBody>> {
    let id = license_id(&id)?;
    let Json(patch) = body?;
    let license = state.service.update_license(&id, &patch)?;
    Ok(Json(LicenseBody { license }))
}

pub(crate) async fn delete_license(
    _admin: Admin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedBody>> {
    state.service.delete_license(&license_id(&id)?)?;
    Ok(Json(DeletedBody { success: true }))
}

pub(crate) async fn create_user(
    _admin: Admin,
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserBody>)> {
    let Json(request) = body?;
    let user = state
        .service
        .create_user(&request.username, request.email.as_deref())?;
    Ok((StatusCode::CREATED, Json(UserBody { user })))
}

pub(crate) async fn get_user(
    _admin: Admin,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserBody>> {
    let user = state.service.user_by_username(&username)?;
    Ok(Json(UserBody { user }))
}

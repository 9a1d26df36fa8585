//! Authentication API Endpoints
//! Mission: Provide registration, login and user management endpoints

use crate::{
    app::AppState,
    auth::{
        middleware::{require_role, AuthError},
        models::{
            AuthProvider, AuthUser, ChangePasswordRequest, GoogleLoginRequest, LoginRequest,
            LoginResponse, RegisterRequest, User, UserResponse, UserRole,
        },
        oauth::{self, OAuthError},
        password::{hash_password, verify_password, MIN_PASSWORD_LEN},
    },
    models::{is_valid_email, normalize_email},
};
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Create a local (password) account. Returns `None` when the email is taken.
pub fn create_local_user(
    state: &AppState,
    name: &str,
    email: &str,
    password: &str,
    role: UserRole,
    patient_id: Option<Uuid>,
) -> Result<Option<User>> {
    let user = User {
        id: Uuid::new_v4(),
        email: normalize_email(email),
        name: name.trim().to_string(),
        password_hash: Some(hash_password(password, state.bcrypt_cost())?),
        role,
        provider: AuthProvider::Local,
        patient_id,
        created_at: Utc::now(),
    };

    if state.store.insert_user(&user)? {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

fn issue_token(state: &AppState, user: &User) -> Result<LoginResponse, AuthApiError> {
    let (token, expires_in) = state.jwt.generate_token(user).map_err(internal)?;
    Ok(LoginResponse {
        token,
        expires_in,
        role: user.role,
        user: UserResponse::from_user(user),
    })
}

fn internal(e: anyhow::Error) -> AuthApiError {
    error!("Auth storage error: {:#}", e);
    AuthApiError::InternalError
}

/// Doctor self-registration - POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), AuthApiError> {
    if payload.name.trim().is_empty() {
        return Err(AuthApiError::InvalidName);
    }
    if !is_valid_email(&payload.email) {
        return Err(AuthApiError::InvalidEmail);
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AuthApiError::WeakPassword);
    }

    let user = create_local_user(
        &state,
        &payload.name,
        &payload.email,
        &payload.password,
        UserRole::Doctor,
        None,
    )
    .map_err(internal)?
    .ok_or(AuthApiError::UserAlreadyExists)?;

    info!("✅ Doctor registered: {}", user.email);
    Ok((StatusCode::CREATED, Json(issue_token(&state, &user)?)))
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    let email = normalize_email(&payload.email);
    info!("🔐 Login attempt: {}", email);

    let user = state
        .store
        .get_user_by_email(&email)
        .map_err(internal)?
        .ok_or_else(|| {
            warn!("❌ Failed login attempt: {}", email);
            AuthApiError::InvalidCredentials
        })?;

    // OAuth-only accounts have no password to check
    let Some(hash) = user.password_hash.as_deref() else {
        warn!("❌ Password login for OAuth-only account: {}", email);
        return Err(AuthApiError::InvalidCredentials);
    };

    if !verify_password(&payload.password, hash).map_err(internal)? {
        warn!("❌ Failed login attempt: {}", email);
        return Err(AuthApiError::InvalidCredentials);
    }

    info!("✅ Login successful: {} ({})", user.email, user.role.as_str());
    Ok(Json(issue_token(&state, &user)?))
}

/// Google sign-in - POST /api/auth/google
/// Expects a Google ID token; unknown verified emails become doctor accounts.
pub async fn google_login(
    State(state): State<AppState>,
    Json(payload): Json<GoogleLoginRequest>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    let client_id = state
        .config
        .oauth
        .google_client_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or(AuthApiError::OAuthNotConfigured)?;

    let claims = oauth::verify_google_id_token(
        &state.http_client,
        &state.config.oauth.google_jwks_url,
        client_id,
        &payload.id_token,
    )
    .await?;
    let email = oauth::verified_email(&claims)?;

    let user = match state.store.get_user_by_email(&email).map_err(internal)? {
        Some(existing) => existing,
        None => {
            let user = User {
                id: Uuid::new_v4(),
                name: claims.name.clone().unwrap_or_else(|| email.clone()),
                email: email.clone(),
                password_hash: None,
                role: UserRole::Doctor,
                provider: AuthProvider::Google,
                patient_id: None,
                created_at: Utc::now(),
            };
            if !state.store.insert_user(&user).map_err(internal)? {
                // Lost a race with a concurrent sign-in for the same email
                state
                    .store
                    .get_user_by_email(&email)
                    .map_err(internal)?
                    .ok_or(AuthApiError::InternalError)?
            } else {
                info!("✅ Doctor created from Google sign-in: {}", email);
                user
            }
        }
    };

    info!("✅ Google login successful: {} ({})", user.email, user.role.as_str());
    Ok(Json(issue_token(&state, &user)?))
}

/// Get current user - GET /api/auth/me
pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserResponse>, AuthApiError> {
    let user = state
        .store
        .get_user(&auth.id)
        .map_err(internal)?
        .ok_or(AuthApiError::UserNotFound)?;

    Ok(Json(UserResponse::from_user(&user)))
}

/// Change own password - PUT /api/auth/password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, AuthApiError> {
    if payload.new_password.len() < MIN_PASSWORD_LEN {
        return Err(AuthApiError::WeakPassword);
    }

    let user = state
        .store
        .get_user(&auth.id)
        .map_err(internal)?
        .ok_or(AuthApiError::UserNotFound)?;

    let Some(hash) = user.password_hash.as_deref() else {
        return Err(AuthApiError::NoPasswordSet);
    };
    if !verify_password(&payload.current_password, hash).map_err(internal)? {
        return Err(AuthApiError::InvalidCredentials);
    }

    let new_hash = hash_password(&payload.new_password, state.bcrypt_cost()).map_err(internal)?;
    if !state
        .store
        .update_user_password(&user.id, &new_hash)
        .map_err(internal)?
    {
        return Err(AuthApiError::UserNotFound);
    }

    info!("🔑 Password changed: {}", user.email);
    Ok(Json(json!({ "message": "Password updated" })))
}

/// List all users - GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<UserResponse>>, AuthApiError> {
    require_role(&auth, &[UserRole::Admin])?;

    let users = state.store.list_users().map_err(internal)?;
    Ok(Json(users.iter().map(UserResponse::from_user).collect()))
}

/// Delete a user - DELETE /api/admin/users/:id
/// Deleting a patient account also removes the patient record and prescriptions.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AuthApiError> {
    require_role(&auth, &[UserRole::Admin])?;

    let user_id = Uuid::parse_str(&user_id).map_err(|_| AuthApiError::InvalidUserId)?;
    if user_id == auth.id {
        return Err(AuthApiError::CannotDeleteSelf);
    }

    let user = state
        .store
        .get_user(&user_id)
        .map_err(internal)?
        .ok_or(AuthApiError::UserNotFound)?;

    if let Some(patient_id) = user.patient_id {
        let removed = state
            .store
            .delete_prescriptions_for_patient(&patient_id)
            .map_err(internal)?;
        state.store.delete_patient(&patient_id).map_err(internal)?;
        info!(patient_id = %patient_id, prescriptions = removed, "Removed patient record with account");
    }

    if !state.store.delete_user(&user_id).map_err(internal)? {
        return Err(AuthApiError::UserNotFound);
    }

    info!("🗑️ User deleted by {}: {}", auth.email, user.email);
    Ok(StatusCode::NO_CONTENT)
}

/// API error types
#[derive(Debug, PartialEq)]
pub enum AuthApiError {
    InvalidCredentials,
    Forbidden,
    OAuthNotConfigured,
    OAuthInvalidToken,
    OAuthJwksFetchFailed,
    OAuthEmailNotVerified,
    UserNotFound,
    UserAlreadyExists,
    WeakPassword,
    InvalidEmail,
    InvalidName,
    NoPasswordSet,
    InvalidUserId,
    CannotDeleteSelf,
    InternalError,
}

impl From<OAuthError> for AuthApiError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::InvalidToken => AuthApiError::OAuthInvalidToken,
            OAuthError::JwksFetchFailed => AuthApiError::OAuthJwksFetchFailed,
            OAuthError::EmailNotVerified => AuthApiError::OAuthEmailNotVerified,
        }
    }
}

impl From<AuthError> for AuthApiError {
    fn from(_: AuthError) -> Self {
        AuthApiError::Forbidden
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid email or password".to_string())
            }
            AuthApiError::Forbidden => {
                (StatusCode::FORBIDDEN, "Insufficient permissions".to_string())
            }
            AuthApiError::OAuthNotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Google sign-in not configured".to_string(),
            ),
            AuthApiError::OAuthInvalidToken => {
                (StatusCode::UNAUTHORIZED, "Invalid Google ID token".to_string())
            }
            AuthApiError::OAuthJwksFetchFailed => (
                StatusCode::BAD_GATEWAY,
                "Failed to fetch Google verification keys".to_string(),
            ),
            AuthApiError::OAuthEmailNotVerified => (
                StatusCode::FORBIDDEN,
                "Google account email is not verified".to_string(),
            ),
            AuthApiError::UserNotFound => (StatusCode::NOT_FOUND, "User not found".to_string()),
            AuthApiError::UserAlreadyExists => {
                (StatusCode::CONFLICT, "Email already registered".to_string())
            }
            AuthApiError::WeakPassword => (
                StatusCode::BAD_REQUEST,
                format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
            ),
            AuthApiError::InvalidEmail => {
                (StatusCode::BAD_REQUEST, "A valid email is required".to_string())
            }
            AuthApiError::InvalidName => (StatusCode::BAD_REQUEST, "name is required".to_string()),
            AuthApiError::NoPasswordSet => (
                StatusCode::BAD_REQUEST,
                "Account signs in with Google and has no password".to_string(),
            ),
            AuthApiError::InvalidUserId => {
                (StatusCode::BAD_REQUEST, "Invalid user ID format".to_string())
            }
            AuthApiError::CannotDeleteSelf => (
                StatusCode::BAD_REQUEST,
                "Cannot delete your own account".to_string(),
            ),
            AuthApiError::InternalError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

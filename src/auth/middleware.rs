//! Authentication Middleware
//! Mission: Protect API endpoints with JWT validation

use crate::{
    app::AppState,
    auth::models::{AuthUser, UserRole},
};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, error};

/// Auth middleware that validates JWT tokens and checks the account still exists
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    // Query token first (download links opened directly in a browser)
    // Example: /api/prescriptions/:id/pdf?token=...
    let token_from_query = req.uri().query().and_then(token_from_query);

    let token_from_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .map(|s| {
            s.strip_prefix("Bearer ")
                .map(|t| t.trim().to_string())
                .ok_or(AuthError::InvalidFormat)
        })
        .transpose()?;

    let token = token_from_query
        .or(token_from_header)
        .ok_or(AuthError::MissingToken)?;

    let claims = state
        .jwt
        .validate_token(&token)
        .map_err(|_| AuthError::InvalidToken)?;
    let user = AuthUser::from_claims(&claims).ok_or(AuthError::InvalidToken)?;

    // Tokens outlive account deletion
    match state.store.get_user(&user.id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            debug!(user_id = %user.id, "Token presented for deleted account");
            return Err(AuthError::InvalidToken);
        }
        Err(e) => {
            error!(user_id = %user.id, "User lookup failed: {:#}", e);
            return Err(AuthError::Unavailable);
        }
    }

    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

fn token_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

/// Reject callers whose role is not in `allowed`
pub fn require_role(user: &AuthUser, allowed: &[UserRole]) -> Result<(), AuthError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

/// Auth error types
#[derive(Debug, PartialEq)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
    Forbidden,
    Unavailable,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
            AuthError::InvalidFormat => (
                StatusCode::UNAUTHORIZED,
                "Invalid authorization format. Use: Bearer {token}",
            ),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "Insufficient permissions"),
            AuthError::Unavailable => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authentication temporarily unavailable",
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

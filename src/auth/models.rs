//! Authentication Models
//! Mission: Define user accounts, roles and token payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    /// Lowercased, unique
    pub email: String,
    pub name: String,
    /// bcrypt hash; `None` for accounts that only sign in through OAuth
    #[serde(default)]
    pub password_hash: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub provider: AuthProvider,
    /// Set for patient accounts
    #[serde(default)]
    pub patient_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// User roles for RBAC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "admin")]
    Admin, // User management, read access to everything
    #[serde(rename = "doctor")]
    Doctor, // Registers patients, writes prescriptions
    #[serde(rename = "patient")]
    Patient, // Reads own profile and prescriptions
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Doctor => "doctor",
            UserRole::Patient => "patient",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "doctor" => Some(UserRole::Doctor),
            "patient" => Some(UserRole::Patient),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthProvider {
    #[default]
    Local,
    Google,
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (user_id)
    pub email: String,
    pub role: UserRole,
    pub exp: usize, // expiration timestamp
}

/// Authenticated caller, placed in request extensions by the auth middleware
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn from_claims(claims: &Claims) -> Option<Self> {
        Some(Self {
            id: Uuid::parse_str(&claims.sub).ok()?,
            email: claims.email.clone(),
            role: claims.role,
        })
    }

    pub fn is(&self, role: UserRole) -> bool {
        self.role == role
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    pub id_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: usize, // seconds until expiration
    pub role: UserRole,
    pub user: UserResponse,
}

/// User response (sanitized)
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub provider: AuthProvider,
    pub patient_id: Option<String>,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            provider: user.provider,
            patient_id: user.patient_id.map(|id| id.to_string()),
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

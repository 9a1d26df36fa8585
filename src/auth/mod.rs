//! Authentication Module
//! Mission: Secure API access with JWT tokens, roles and Google sign-in

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod oauth;
pub mod password;

pub use jwt::JwtHandler;
pub use middleware::{auth_middleware, require_role, AuthError};
pub use models::{AuthUser, UserRole};
pub use password::MIN_PASSWORD_LEN;

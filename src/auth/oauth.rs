//! Google sign-in
//!
//! Verifies a Google ID token (RS256) against Google's published JWKS.

use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::{debug, warn};

pub const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleIdClaims {
    pub sub: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub name: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum OAuthError {
    InvalidToken,
    JwksFetchFailed,
    EmailNotVerified,
}

/// Fetch Google's signing keys and verify `id_token` for `client_id`
pub async fn verify_google_id_token(
    http: &reqwest::Client,
    jwks_url: &str,
    client_id: &str,
    id_token: &str,
) -> Result<GoogleIdClaims, OAuthError> {
    // Reject malformed tokens before going to the network
    decode_header(id_token).map_err(|_| OAuthError::InvalidToken)?;

    let jwks = fetch_jwks(http, jwks_url).await?;
    verify_with_jwks(&jwks, client_id, id_token)
}

async fn fetch_jwks(http: &reqwest::Client, jwks_url: &str) -> Result<JwkSet, OAuthError> {
    let resp = http.get(jwks_url).send().await.map_err(|e| {
        warn!("JWKS fetch failed: {}", e);
        OAuthError::JwksFetchFailed
    })?;

    if !resp.status().is_success() {
        warn!("JWKS fetch returned {}", resp.status());
        return Err(OAuthError::JwksFetchFailed);
    }

    resp.json::<JwkSet>()
        .await
        .map_err(|_| OAuthError::JwksFetchFailed)
}

pub fn verify_with_jwks(
    jwks: &JwkSet,
    client_id: &str,
    id_token: &str,
) -> Result<GoogleIdClaims, OAuthError> {
    let header = decode_header(id_token).map_err(|_| OAuthError::InvalidToken)?;
    let kid = header.kid.ok_or(OAuthError::InvalidToken)?;

    let jwk = jwks.find(&kid).ok_or(OAuthError::InvalidToken)?;
    let decoding_key = DecodingKey::from_jwk(jwk).map_err(|_| OAuthError::InvalidToken)?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(std::slice::from_ref(&client_id));
    validation.set_issuer(&GOOGLE_ISSUERS[..]);

    let token_data = decode::<GoogleIdClaims>(id_token, &decoding_key, &validation)
        .map_err(|_| OAuthError::InvalidToken)?;

    debug!("Verified Google ID token for subject {}", token_data.claims.sub);
    Ok(token_data.claims)
}

/// The account email, only if Google has verified it
pub fn verified_email(claims: &GoogleIdClaims) -> Result<String, OAuthError> {
    match (&claims.email, claims.email_verified) {
        (Some(email), true) if !email.trim().is_empty() => {
            Ok(crate::models::normalize_email(email))
        }
        _ => Err(OAuthError::EmailNotVerified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn claims(email: Option<&str>, verified: bool) -> GoogleIdClaims {
        GoogleIdClaims {
            sub: "1234567890".to_string(),
            email: email.map(|e| e.to_string()),
            email_verified: verified,
            name: Some("Dr. Google".to_string()),
        }
    }

    #[test]
    fn test_verified_email() {
        assert_eq!(
            verified_email(&claims(Some("Doc@Example.org"), true)),
            Ok("doc@example.org".to_string())
        );
        assert_eq!(
            verified_email(&claims(Some("doc@example.org"), false)),
            Err(OAuthError::EmailNotVerified)
        );
        assert_eq!(
            verified_email(&claims(None, true)),
            Err(OAuthError::EmailNotVerified)
        );
    }

    #[test]
    fn test_garbage_token_rejected() {
        let jwks = JwkSet { keys: vec![] };
        assert_eq!(
            verify_with_jwks(&jwks, "client", "not-a-jwt").unwrap_err(),
            OAuthError::InvalidToken
        );
    }

    #[test]
    fn test_token_without_matching_key_rejected() {
        let mut header = Header::default();
        header.kid = Some("unknown-kid".to_string());
        let token = encode(
            &header,
            &json!({ "sub": "1", "aud": "client", "iss": "accounts.google.com", "exp": 4102444800u64 }),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let jwks = JwkSet { keys: vec![] };
        assert_eq!(
            verify_with_jwks(&jwks, "client", &token).unwrap_err(),
            OAuthError::InvalidToken
        );
    }

    #[tokio::test]
    async fn test_malformed_token_skips_network() {
        let http = reqwest::Client::new();
        let result =
            verify_google_id_token(&http, "http://127.0.0.1:9/unused", "client", "garbage").await;
        assert_eq!(result.unwrap_err(), OAuthError::InvalidToken);
    }
}

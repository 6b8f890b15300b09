//! Bearer tokens of the form `<user_id>.<hex hmac-sha256(user_id)>`.

use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::debug;

use crate::{api::AppState, error::ApiError};

type HmacSha256 = Hmac<Sha256>;

const MAX_USER_ID_LEN: usize = 64;

pub struct TokenAuth {
    secret: SecretString,
}

impl TokenAuth {
    pub fn new(secret: SecretString) -> Self {
        TokenAuth { secret }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC can take key of any size")
    }

    pub fn issue(&self, user_id: &str) -> anyhow::Result<String> {
        if !is_valid_user_id(user_id) {
            anyhow::bail!(
                "invalid user id '{user_id}': use 1-{MAX_USER_ID_LEN} characters of [A-Za-z0-9_-]"
            );
        }
        let mut mac = self.mac();
        mac.update(user_id.as_bytes());
        let sig = mac.finalize().into_bytes();
        Ok(format!("{user_id}.{}", hex::encode(sig)))
    }

    /// Returns the user id the token was issued for.
    pub fn verify(&self, token: &str) -> Option<String> {
        let (user_id, sig_hex) = token.trim().rsplit_once('.')?;
        if !is_valid_user_id(user_id) {
            return None;
        }
        let sig = hex::decode(sig_hex).ok()?;
        let mut mac = self.mac();
        mac.update(user_id.as_bytes());
        mac.verify_slice(&sig).ok()?;
        Some(user_id.to_string())
    }
}

pub fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// The caller's user id, resolved from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::MissingToken)?;

        // Both "Bearer <token>" and a bare token are accepted.
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        if token.is_empty() {
            return Err(ApiError::MissingToken);
        }

        match state.auth.verify(token) {
            Some(user_id) => Ok(AuthUser(user_id)),
            None => {
                debug!("rejected bearer token");
                Err(ApiError::InvalidToken)
            }
        }
    }
}

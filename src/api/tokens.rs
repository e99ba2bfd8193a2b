use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::auth::RequireAdmin;
use crate::store::postgres::{NewToken, TokenRow};
use crate::AppState;

/// Default token validity: 30 days.
pub const DEFAULT_LIFETIME_SECS: i64 = 2_592_000;
/// Upper bound on token validity: 365 days.
pub const MAX_LIFETIME_SECS: i64 = 31_536_000;
/// Display names are capped at 50 characters.
pub const MAX_NAME_LEN: usize = 50;

/// Raw entropy per secret, base64-encoded before storage.
const SECRET_BYTES: usize = 128;

// -- Request / Response DTOs --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub id: Uuid,
    /// The bearer credential. Create is the only place the API ever
    /// returns it; listings omit it.
    pub secret: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSummary {
    pub id: Uuid,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<TokenRow> for TokenSummary {
    fn from(row: TokenRow) -> Self {
        Self {
            id: row.public_id,
            name: row.name,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

// -- Validation and token material --

pub fn validate_lifetime(secs: i64) -> Result<i64, AppError> {
    if (1..=MAX_LIFETIME_SECS).contains(&secs) {
        Ok(secs)
    } else {
        Err(AppError::Unprocessable(format!(
            "The \"lifetime\" property must be an integer between 1 and {MAX_LIFETIME_SECS}."
        )))
    }
}

pub fn validate_name(name: Option<String>) -> Result<Option<String>, AppError> {
    match name {
        None => Ok(None),
        Some(n) if n.chars().count() <= MAX_NAME_LEN => Ok(Some(n)),
        Some(_) => Err(AppError::Unprocessable(format!(
            "The \"name\" property must not be longer than {MAX_NAME_LEN} characters."
        ))),
    }
}

fn lifetime_from_body(body: &Value) -> Result<i64, AppError> {
    match body.get("lifetime") {
        None | Some(Value::Null) => Ok(DEFAULT_LIFETIME_SECS),
        Some(v) => {
            let secs = v.as_i64().ok_or_else(|| {
                AppError::Unprocessable(
                    "The \"lifetime\" property must be an integer number of seconds.".to_string(),
                )
            })?;
            validate_lifetime(secs)
        }
    }
}

fn name_from_body(body: &Value) -> Result<Option<String>, AppError> {
    match body.get("name") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => validate_name(Some(s.clone())),
        Some(_) => Err(AppError::Unprocessable(
            "The \"name\" property must be a string.".to_string(),
        )),
    }
}

/// Generate a fresh secret: 128 bytes from the OS RNG, base64-encoded.
/// Secrets are unique by construction and never regenerated.
pub fn generate_secret() -> String {
    let mut buf = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut buf);
    BASE64.encode(buf)
}

pub fn expiry_for(created_at: DateTime<Utc>, lifetime_secs: i64) -> DateTime<Utc> {
    created_at + Duration::seconds(lifetime_secs)
}

// -- Handlers --

/// GET /api/tokens - list all tokens, newest first. Admin only.
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
) -> Result<Json<Vec<TokenSummary>>, AppError> {
    let tokens = state.db.list_tokens().await?;
    Ok(Json(tokens.into_iter().map(TokenSummary::from).collect()))
}

/// POST /api/tokens - mint a token. Admin only. The response is the one
/// place the plaintext secret is disclosed.
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    body: Option<Json<Value>>,
) -> Result<(StatusCode, Json<TokenResponse>), AppError> {
    let body = body
        .map(|Json(v)| v)
        .unwrap_or_else(|| Value::Object(Default::default()));

    let lifetime = lifetime_from_body(&body)?;
    let name = name_from_body(&body)?;

    let now = Utc::now();
    let token = NewToken {
        public_id: Uuid::new_v4(),
        secret: generate_secret(),
        name,
        created_at: now,
        expires_at: expiry_for(now, lifetime),
    };

    state.db.insert_token(&token).await?;
    tracing::info!(token = %token.public_id, "token created");

    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            id: token.public_id,
            secret: token.secret,
            name: token.name,
            created_at: token.created_at,
            expires_at: token.expires_at,
        }),
    ))
}

/// DELETE /api/tokens/:id - delete a token by public id. Admin only.
/// The token's images are removed with it.
pub async fn delete_token(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let public_id = Uuid::parse_str(&id)
        .map_err(|_| AppError::NotFound("No token found with this id.".to_string()))?;

    if state.db.delete_token(public_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("No token found with this id.".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifetime_bounds_are_inclusive() {
        assert!(validate_lifetime(0).is_err());
        assert!(validate_lifetime(-5).is_err());
        assert_eq!(validate_lifetime(1).unwrap(), 1);
        assert_eq!(
            validate_lifetime(DEFAULT_LIFETIME_SECS).unwrap(),
            DEFAULT_LIFETIME_SECS
        );
        assert_eq!(
            validate_lifetime(MAX_LIFETIME_SECS).unwrap(),
            MAX_LIFETIME_SECS
        );
        assert!(validate_lifetime(MAX_LIFETIME_SECS + 1).is_err());
    }

    #[test]
    fn lifetime_defaults_when_absent_and_rejects_non_integers() {
        assert_eq!(
            lifetime_from_body(&json!({})).unwrap(),
            DEFAULT_LIFETIME_SECS
        );
        assert_eq!(
            lifetime_from_body(&json!({ "lifetime": null })).unwrap(),
            DEFAULT_LIFETIME_SECS
        );
        assert_eq!(lifetime_from_body(&json!({ "lifetime": 60 })).unwrap(), 60);
        assert!(lifetime_from_body(&json!({ "lifetime": 1.5 })).is_err());
        assert!(lifetime_from_body(&json!({ "lifetime": "60" })).is_err());
        assert!(lifetime_from_body(&json!({ "lifetime": 0 })).is_err());
    }

    #[test]
    fn name_is_optional_and_capped_at_fifty_characters() {
        assert_eq!(name_from_body(&json!({})).unwrap(), None);
        assert_eq!(
            name_from_body(&json!({ "name": "App" })).unwrap(),
            Some("App".to_string())
        );

        let exactly_fifty = "x".repeat(MAX_NAME_LEN);
        assert!(name_from_body(&json!({ "name": exactly_fifty })).is_ok());

        let fifty_one = "x".repeat(MAX_NAME_LEN + 1);
        assert!(name_from_body(&json!({ "name": fifty_one })).is_err());

        assert!(name_from_body(&json!({ "name": 42 })).is_err());
    }

    #[test]
    fn secrets_decode_to_full_entropy_and_differ() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);

        let decoded = BASE64.decode(&a).unwrap();
        assert_eq!(decoded.len(), SECRET_BYTES);
        assert!(a.is_ascii());
    }

    #[test]
    fn expiry_is_exactly_created_plus_lifetime() {
        let created = Utc::now();
        let expires = expiry_for(created, 60);
        assert_eq!((expires - created).num_seconds(), 60);
    }
}

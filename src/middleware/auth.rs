//! Bearer-token authentication and the two authorization gates.
//!
//! Every authenticated route declares its identity class in the handler
//! signature: `Identity` for routes open to both classes, `RequireAdmin`
//! for administrator-only routes, `RequireUser` for token-only routes.
//! Extraction runs before any handler logic and performs at most one
//! store read (none for the admin secret).

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::store::postgres::TokenRow;
use crate::AppState;

/// The resolved caller: either the administrator or a stored token.
/// Request-scoped, recomputed per request, never persisted.
#[derive(Debug)]
pub enum Identity {
    Admin,
    User(TokenRow),
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        matches!(self, Identity::Admin)
    }
}

/// Pull the credential out of `Authorization: Bearer <value>`.
/// Per RFC 6750 the scheme is case-insensitive.
fn extract_bearer(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if header.trim().is_empty() {
        return Err(AppError::Unauthenticated(
            "No Authorization header sent.".to_string(),
        ));
    }

    if header.len() >= 7 && header[..7].eq_ignore_ascii_case("bearer ") {
        let value = &header[7..];
        if !value.is_empty() {
            return Ok(value);
        }
    }

    Err(AppError::Unauthenticated(
        "The Authorization header does not contain a valid Bearer token.".to_string(),
    ))
}

/// Compare a presented credential against the admin secret without leaking
/// the match position through timing.
fn matches_admin_secret(provided: &str, admin_token: &str) -> bool {
    provided.as_bytes().ct_eq(admin_token.as_bytes()).into()
}

/// A stored token authenticates only while its expiry is strictly in the
/// future. Expired rows stay in the store and are simply ignored.
fn token_is_live(token: &TokenRow, now: DateTime<Utc>) -> bool {
    token.expires_at > now
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let credential = extract_bearer(parts)?;

        if matches_admin_secret(credential, &state.config.admin_token) {
            return Ok(Identity::Admin);
        }

        let token = state
            .db
            .get_token_by_secret(credential)
            .await
            .map_err(AppError::Database)?;

        match token {
            Some(row) if token_is_live(&row, Utc::now()) => Ok(Identity::User(row)),
            _ => Err(AppError::Unauthenticated(
                "The Bearer token sent in the Authorization header is not valid.".to_string(),
            )),
        }
    }
}

/// Gate: administrator identity required.
pub struct RequireAdmin;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match Identity::from_request_parts(parts, state).await? {
            Identity::Admin => Ok(RequireAdmin),
            Identity::User(_) => Err(AppError::Forbidden(
                "You must be an administrator to perform this action.".to_string(),
            )),
        }
    }
}

/// Gate: non-admin token identity required. Carries the caller's token row.
pub struct RequireUser(pub TokenRow);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match Identity::from_request_parts(parts, state).await? {
            Identity::User(row) => Ok(RequireUser(row)),
            Identity::Admin => Err(AppError::Forbidden(
                "Administrators cannot perform this action.".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use chrono::Duration;
    use uuid::Uuid;

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/images");
        if let Some(v) = value {
            builder = builder.header(AUTHORIZATION, v);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        parts
    }

    fn token_row(expires_at: DateTime<Utc>) -> TokenRow {
        TokenRow {
            id: 1,
            public_id: Uuid::new_v4(),
            secret: "s3cret".to_string(),
            name: Some("App".to_string()),
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn missing_or_blank_header_is_rejected() {
        assert!(extract_bearer(&parts_with_auth(None)).is_err());
        assert!(extract_bearer(&parts_with_auth(Some(""))).is_err());
        assert!(extract_bearer(&parts_with_auth(Some("   "))).is_err());
    }

    #[test]
    fn non_bearer_shapes_are_rejected() {
        assert!(extract_bearer(&parts_with_auth(Some("Basic abc"))).is_err());
        assert!(extract_bearer(&parts_with_auth(Some("Bearer"))).is_err());
        assert!(extract_bearer(&parts_with_auth(Some("Bearer "))).is_err());
        assert!(extract_bearer(&parts_with_auth(Some("token-without-scheme"))).is_err());
    }

    #[test]
    fn bearer_value_is_extracted_case_insensitively() {
        let parts = parts_with_auth(Some("Bearer my-token"));
        assert_eq!(extract_bearer(&parts).unwrap(), "my-token");

        let parts = parts_with_auth(Some("bearer my-token"));
        assert_eq!(extract_bearer(&parts).unwrap(), "my-token");
    }

    #[test]
    fn admin_secret_comparison_is_exact() {
        assert!(matches_admin_secret("hunter2", "hunter2"));
        assert!(!matches_admin_secret("hunter2", "hunter22"));
        assert!(!matches_admin_secret("", "hunter2"));
    }

    #[test]
    fn token_expiry_is_strict() {
        let now = Utc::now();
        assert!(token_is_live(&token_row(now + Duration::seconds(1)), now));
        assert!(!token_is_live(&token_row(now), now));
        assert!(!token_is_live(&token_row(now - Duration::seconds(1)), now));
    }
}

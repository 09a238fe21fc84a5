//! Authentication middleware.
//!
//! Builds the engine session from two headers:
//!
//! - `Authorization: Bearer <subject uuid>`, or `Bearer <subject uuid>:<secret>`
//!   when `AUTH_SECRET` is configured
//! - `X-Auth-Keys: a,b`, the auth keys the caller holds (default `none`)

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderName},
};
use folio_engine::{Session, DEFAULT_AUTH_KEY};
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

/// Header listing the caller's auth keys.
pub static AUTH_KEYS_HEADER: HeaderName = HeaderName::from_static("x-auth-keys");

/// Session of the caller, extracted from request headers.
#[derive(Debug, Clone)]
pub struct AuthSession(pub Session);

fn parse_auth_keys(header: Option<&str>) -> Vec<String> {
    let keys: Vec<String> = header
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect();
    if keys.is_empty() {
        vec![DEFAULT_AUTH_KEY.to_string()]
    } else {
        keys
    }
}

fn parse_subject(token: &str, secret: Option<&str>) -> Result<Uuid, AppError> {
    let subject = match secret {
        Some(secret) => {
            let (subject, provided) = token
                .split_once(':')
                .ok_or(AppError::Unauthorized("Missing token secret"))?;
            if provided != secret {
                return Err(AppError::Unauthorized("Invalid token secret"));
            }
            subject
        }
        None => token,
    };
    Uuid::parse_str(subject).map_err(|_| AppError::Unauthorized("Invalid subject id"))
}

fn header_value<'a>(parts: &'a Parts, name: &HeaderName) -> Option<&'a str> {
    parts.headers.get(name).and_then(|value| value.to_str().ok())
}

/// Resolve a session from the raw header values.
pub fn session_from_headers(
    authorization: Option<&str>,
    auth_keys: Option<&str>,
    secret: Option<&str>,
) -> Result<Session, AppError> {
    let subject_id = match authorization {
        Some(header) => {
            let token = header
                .strip_prefix("Bearer ")
                .ok_or(AppError::Unauthorized("Invalid authorization header format"))?;
            if token.is_empty() {
                return Err(AppError::Unauthorized("Empty bearer token"));
            }
            parse_subject(token, secret)?
        }
        // Without a secret configured, allow anonymous access
        None if secret.is_none() => Uuid::nil(),
        None => return Err(AppError::Unauthorized("Missing authorization header")),
    };

    Ok(Session::new(subject_id).with_auth_keys(parse_auth_keys(auth_keys)))
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = session_from_headers(
            header_value(parts, &AUTHORIZATION),
            header_value(parts, &AUTH_KEYS_HEADER),
            state.config.auth_secret.as_deref(),
        )?;
        Ok(AuthSession(session))
    }
}

//! Request authentication: RS256 bearer tokens issued by the identity service.

use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use crypto_core::bearer_token;
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// The caller's identity, taken from the token subject.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub id: Uuid,
}

/// Token from `Authorization: Bearer ...`, or from the `token` query
/// parameter when `allow_query` is set (browsers cannot set headers on a
/// WebSocket upgrade).
pub fn token_from_request(req: &HttpRequest, allow_query: bool) -> Option<String> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);

    if from_header.is_some() || !allow_query {
        return from_header;
    }

    web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().token)
        .filter(|t| !t.is_empty())
}

#[derive(serde::Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

pub fn authenticate(req: &HttpRequest, allow_query: bool) -> Result<AuthenticatedUser, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or(AppError::Internal)?;
    let token = token_from_request(req, allow_query).ok_or(AppError::Unauthenticated)?;

    let id = state.jwt.user_id(&token).map_err(|e| {
        tracing::debug!(error = %e, "rejected token");
        AppError::Unauthenticated
    })?;

    Ok(AuthenticatedUser { id })
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req, false))
    }
}

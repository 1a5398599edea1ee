//! Request authentication extractors.
//!
//! Console endpoints carry a bearer JWT minted by the external identity
//! provider and verified locally against the shared HS256 secret. Runtime
//! endpoints carry the project API key in `x-api-key` (or `?api_key=` for
//! browser websocket upgrades); the node only ever compares digests.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use triggr_common::TriggrError;
use triggr_registry::Project;

use crate::gateway::envelope::ApiError;
use crate::gateway::AppState;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Authenticated console operator.
pub struct ConsoleUser {
    pub owner_id: String,
}

impl FromRequestParts<Arc<AppState>> for ConsoleUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError(TriggrError::Unauthorized))?;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.console_jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| ApiError(TriggrError::Unauthorized))?;

        Ok(ConsoleUser {
            owner_id: claims.claims.sub,
        })
    }
}

/// Authenticated runtime caller: the project resolved from its API key.
pub struct ApiKeyAuth {
    pub project: Arc<Project>,
}

impl FromRequestParts<Arc<AppState>> for ApiKeyAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header_key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let key = match header_key.or_else(|| query_api_key(parts.uri.query())) {
            Some(key) => key,
            None => return Err(ApiError(TriggrError::Unauthorized)),
        };

        let project = state
            .projects
            .find_by_api_key(&key)
            .await
            .ok_or(ApiError(TriggrError::Unauthorized))?;

        state.check_rate_limit(&project.api_key_digest).await?;

        Ok(ApiKeyAuth { project })
    }
}

fn query_api_key(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("api_key="))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_api_key_parses() {
        assert_eq!(
            query_api_key(Some("api_key=abc&x=1")),
            Some("abc".to_string())
        );
        assert_eq!(query_api_key(Some("x=1&api_key=abc")), Some("abc".into()));
        assert_eq!(query_api_key(Some("x=1")), None);
        assert_eq!(query_api_key(None), None);
    }
}

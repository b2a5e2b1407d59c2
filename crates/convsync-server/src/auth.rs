//! Bearer-token authentication.
//!
//! The owner of every protected request comes from the token table, never
//! from the request body or query.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tracing::debug;

use convsync_shared::OwnerId;

use crate::error::ServerError;

#[derive(Clone, Default)]
pub struct TokenAuthenticator {
    tokens: Arc<Vec<(Vec<u8>, OwnerId)>>,
}

impl TokenAuthenticator {
    pub fn new(tokens: &HashMap<String, OwnerId>) -> Self {
        Self {
            tokens: Arc::new(
                tokens
                    .iter()
                    .map(|(token, owner)| (token.as_bytes().to_vec(), owner.clone()))
                    .collect(),
            ),
        }
    }

    /// Resolve a token to its owner.  Every configured token is compared in
    /// constant time.
    pub fn authenticate(&self, token: &str) -> Option<OwnerId> {
        let presented = token.as_bytes();
        let mut found = None;
        for (expected, owner) in self.tokens.iter() {
            let matches = expected.len() == presented.len()
                && bool::from(expected.as_slice().ct_eq(presented));
            if matches {
                found = Some(owner.clone());
            }
        }
        found
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve the caller and attach its [`OwnerId`] as a request extension.
pub async fn auth_middleware(
    State(auth): State<TokenAuthenticator>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let owner = bearer_token(&req)
        .and_then(|token| auth.authenticate(token))
        .ok_or_else(|| {
            debug!(path = %req.uri().path(), "Rejected unauthenticated request");
            ServerError::Unauthorized
        })?;

    req.extensions_mut().insert(owner);
    Ok(next.run(req).await)
}

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use scrapepilot_core::error::AppError;
use scrapepilot_core::traits::IdentityProvider;

use crate::error::ApiError;
use crate::state::AppState;

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware that resolves `Authorization: Bearer <api_key>` to an
/// [`Identity`](scrapepilot_core::Identity) and stores it in the request
/// extensions.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request).ok_or_else(|| {
        AppError::Unauthenticated(
            "Missing or invalid Authorization header. Expected: Bearer <api_key>".into(),
        )
    })?;

    let identity = state.db.api_keys().authenticate(token).await?;
    tracing::debug!(user_id = %identity.user_id, "Request authenticated");

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

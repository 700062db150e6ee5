use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::auth::{AppState, decode_token};
use crate::error::{ApiError, blocking};
use crate::policy::Actor;

/// Validate the bearer JWT and load the caller from the database.
///
/// The user row is read on every request so that a role change takes effect
/// without reissuing tokens, and tokens revoked by logout are refused.
/// Inserts the `User`, its `Actor` and the token's `Claims`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = {
        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthenticated)?;

        decode_token(&state.jwt_secret, token).map_err(|_| ApiError::Unauthenticated)?
    };

    let (jti, user_id) = (claims.jti, claims.sub);
    let user = blocking(move || {
        if state.db.is_token_revoked(jti)? {
            return Ok(None);
        }
        Ok(state.db.get_user_by_id(user_id)?)
    })
    .await?
    .ok_or(ApiError::Unauthenticated)?;

    req.extensions_mut().insert(Actor::from(&user));
    req.extensions_mut().insert(user);
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

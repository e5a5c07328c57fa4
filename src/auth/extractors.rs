use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use crate::{
    auth::{cookies::ACCESS_COOKIE, jwt::JwtKeys},
    error::ApiError,
    state::AppState,
    users::repo_types::PublicUser,
};

/// The caller behind a valid access token, loaded as a sanitized user.
pub struct AuthUser(pub PublicUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = access_token_from(parts)
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized request".into()))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(&token).map_err(|e| {
            warn!(error = %e, "invalid or expired access token");
            ApiError::Unauthorized("Invalid access token".into())
        })?;

        let user = state
            .users
            .find_public_by_id(claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "access token for unknown user");
                ApiError::Unauthorized("Invalid access token".into())
            })?;

        Ok(AuthUser(user))
    }
}

// Cookie first, then `Authorization: Bearer <token>`.
fn access_token_from(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(c) = jar.get(ACCESS_COOKIE).filter(|c| !c.value().is_empty()) {
        return Some(c.value().to_string());
    }

    let auth = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut req = Request::builder().uri("/");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        req.body(()).unwrap().into_parts().0
    }

    #[test]
    fn prefers_cookie_over_bearer() {
        let p = parts(&[
            ("cookie", "accessToken=from-cookie"),
            ("authorization", "Bearer from-header"),
        ]);
        assert_eq!(access_token_from(&p).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn falls_back_to_bearer() {
        let p = parts(&[("authorization", "Bearer abc")]);
        assert_eq!(access_token_from(&p).as_deref(), Some("abc"));
    }

    #[test]
    fn none_without_credentials() {
        assert!(access_token_from(&parts(&[])).is_none());
        assert!(access_token_from(&parts(&[("authorization", "Basic xyz")])).is_none());
    }
}

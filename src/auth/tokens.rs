use anyhow::Context;
use axum::extract::FromRef;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{auth::jwt::JwtKeys, error::ApiError, state::AppState};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Mints a fresh access/refresh pair for `user_id` and persists the refresh token.
///
/// Every failure collapses into [`ApiError::TokenGeneration`]; the cause is only logged.
pub async fn issue_token_pair(state: &AppState, user_id: Uuid) -> Result<TokenPair, ApiError> {
    mint_and_store(state, user_id)
        .await
        .map_err(|e| generation_failed(e, user_id))
}

/// Exchanges `presented` for a new pair. The stored token is swapped only while it
/// still equals `presented`, so a refresh token is redeemable once.
pub async fn rotate_token_pair(
    state: &AppState,
    user_id: Uuid,
    presented: &str,
) -> Result<TokenPair, ApiError> {
    let pair = mint(state, user_id)
        .await
        .map_err(|e| generation_failed(e, user_id))?;

    let swapped = state
        .users
        .rotate_refresh_token(user_id, presented, &pair.refresh_token)
        .await
        .map_err(|e| generation_failed(e.into(), user_id))?;
    if !swapped {
        warn!(%user_id, "refresh token already rotated");
        return Err(ApiError::Unauthorized(
            "Refresh token is expired or used".into(),
        ));
    }
    Ok(pair)
}

fn generation_failed(e: anyhow::Error, user_id: Uuid) -> ApiError {
    error!(error = ?e, %user_id, "token generation failed");
    ApiError::TokenGeneration
}

async fn mint(state: &AppState, user_id: Uuid) -> anyhow::Result<TokenPair> {
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .context("user vanished before token issue")?;

    let keys = JwtKeys::from_ref(state);
    Ok(TokenPair {
        access_token: keys.sign_access(&user)?,
        refresh_token: keys.sign_refresh(user.id)?,
    })
}

async fn mint_and_store(state: &AppState, user_id: Uuid) -> anyhow::Result<TokenPair> {
    let pair = mint(state, user_id).await?;
    let updated = state
        .users
        .set_refresh_token(user_id, Some(&pair.refresh_token))
        .await?;
    anyhow::ensure!(updated, "refresh token update matched no row");
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::NewUser;

    #[tokio::test]
    async fn persists_issued_refresh_token() {
        let state = AppState::fake();
        let user = state
            .users
            .create(NewUser {
                username: "alice".into(),
                email: "a@x.com".into(),
                full_name: "Alice A".into(),
                avatar: "https://fake.local/avatars/a.png".into(),
                cover_image: String::new(),
                password_hash: "x".into(),
            })
            .await
            .unwrap();

        let pair = issue_token_pair(&state, user.id).await.unwrap();
        let stored = state.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));

        let keys = JwtKeys::from_ref(&state);
        assert_eq!(keys.verify_access(&pair.access_token).unwrap().sub, user.id);
    }

    #[tokio::test]
    async fn rotation_is_single_use() {
        let state = AppState::fake();
        let user = state
            .users
            .create(NewUser {
                username: "bob".into(),
                email: "b@x.com".into(),
                full_name: "Bob B".into(),
                avatar: "https://fake.local/avatars/b.png".into(),
                cover_image: String::new(),
                password_hash: "x".into(),
            })
            .await
            .unwrap();
        let first = issue_token_pair(&state, user.id).await.unwrap();

        let next = rotate_token_pair(&state, user.id, &first.refresh_token)
            .await
            .unwrap();
        let err = rotate_token_pair(&state, user.id, &first.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let stored = state.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(next.refresh_token.as_str()));
    }

    #[tokio::test]
    async fn unknown_user_is_uniform_failure() {
        let state = AppState::fake();
        let err = issue_token_pair(&state, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::TokenGeneration));
    }
}

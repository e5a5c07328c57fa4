use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::{cookie::CookieJar, WithRejection};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        cookies::{with_session_cookies, without_session_cookies, REFRESH_COOKIE},
        extractors::AuthUser,
        jwt::JwtKeys,
        password::{hash_password_blocking, verify_password_blocking},
        tokens::{issue_token_pair, rotate_token_pair, TokenPair},
    },
    error::ApiError,
    media::services::{upload_profile_image, MediaSlot, UploadItem},
    response::ApiResponse,
    state::AppState,
    users::{
        dto::{LoginRequest, LoginResponse, RefreshRequest, RegisterForm},
        repo_types::{NewUser, PublicUser},
    },
};

pub fn auth_routes(upload_limit_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/users/register",
            post(register).layer(DefaultBodyLimit::max(upload_limit_bytes)),
        )
        .route("/users/login", post(login))
        .route("/users/logout", post(logout))
        .route("/users/refresh-token", post(refresh_access_token))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/users/current-user", get(current_user))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trimmed value, or `None` when absent or blank.
fn non_blank(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

fn normalize_identity(v: &str) -> String {
    v.trim().to_lowercase()
}

async fn read_register_form(mut mp: Multipart) -> Result<RegisterForm, ApiError> {
    let mut form = RegisterForm::default();
    while let Some(field) = mp.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "username" => form.username = Some(field.text().await?),
            "email" => form.email = Some(field.text().await?),
            "fullName" => form.full_name = Some(field.text().await?),
            "password" => form.password = Some(field.text().await?),
            "avatar" | "coverImage" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let body = field.bytes().await?;
                // browsers send an empty part when no file was picked
                if body.is_empty() {
                    continue;
                }
                let item = UploadItem { body, content_type };
                if name == "avatar" {
                    form.avatar = Some(item);
                } else {
                    form.cover_image = Some(item);
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    WithRejection(mp, _): WithRejection<Multipart, ApiError>,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let form = read_register_form(mp).await?;

    let fields = [
        ("username", form.username.as_deref()),
        ("email", form.email.as_deref()),
        ("fullName", form.full_name.as_deref()),
        ("password", form.password.as_deref()),
    ];
    let missing: Vec<&'static str> = fields
        .iter()
        .filter(|(_, v)| non_blank(*v).is_none())
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        warn!(?missing, "register missing fields");
        return Err(ApiError::MissingFields(missing));
    }

    let username = normalize_identity(form.username.as_deref().unwrap_or_default());
    let email = normalize_identity(form.email.as_deref().unwrap_or_default());
    let full_name = form.full_name.as_deref().unwrap_or_default().trim().to_string();
    let password = form.password.unwrap_or_default();

    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }

    if state
        .users
        .find_by_username_or_email(Some(&username), Some(&email))
        .await?
        .is_some()
    {
        warn!(%username, %email, "username or email already registered");
        return Err(ApiError::Conflict(
            "User with email or username already exists".into(),
        ));
    }

    let Some(avatar_file) = form.avatar else {
        warn!(%username, "register without avatar");
        return Err(ApiError::Upload("Avatar file is required".into()));
    };

    let avatar = upload_profile_image(&state, MediaSlot::Avatar, avatar_file)
        .await
        .map_err(|e| {
            warn!(error = ?e, "avatar upload failed");
            ApiError::Upload("Avatar file upload failed".into())
        })?;

    let cover_image = match form.cover_image {
        Some(file) => upload_profile_image(&state, MediaSlot::CoverImage, file)
            .await
            .unwrap_or_else(|e| {
                warn!(error = ?e, "cover image upload failed; storing none");
                String::new()
            }),
        None => String::new(),
    };

    let password_hash = hash_password_blocking(password).await?;

    let created = state
        .users
        .create(NewUser {
            username,
            email,
            full_name,
            avatar,
            cover_image,
            password_hash,
        })
        .await?;

    let user = state
        .users
        .find_public_by_id(created.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("created user {} not readable", created.id))?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        user,
        "User registered successfully",
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<(CookieJar, ApiResponse<LoginResponse>), ApiError> {
    let username = non_blank(payload.username.as_deref()).map(normalize_identity);
    let email = non_blank(payload.email.as_deref()).map(normalize_identity);

    if username.is_none() && email.is_none() {
        warn!("login without identifier");
        return Err(ApiError::Validation("Username or email is required".into()));
    }

    let password = match payload.password {
        Some(p) if !p.trim().is_empty() => p,
        _ => return Err(ApiError::Validation("Password is required".into())),
    };

    let user = state
        .users
        .find_by_username_or_email(username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| {
            warn!(?username, ?email, "login unknown user");
            ApiError::NotFound("User does not exist".into())
        })?;

    if !verify_password_blocking(password, user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::Authentication("Invalid user credentials".into()));
    }

    let pair = issue_token_pair(&state, user.id).await?;

    let public = state
        .users
        .find_public_by_id(user.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {} vanished during login", user.id))?;

    info!(user_id = %public.id, "user logged in");
    let jar = with_session_cookies(jar, &pair);
    Ok((
        jar,
        ApiResponse::ok(
            LoginResponse {
                user: public,
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<serde_json::Value>), ApiError> {
    state.users.set_refresh_token(user.id, None).await?;

    info!(user_id = %user.id, "user logged out");
    Ok((
        without_session_cookies(jar),
        ApiResponse::ok(json!({}), "User logged out successfully"),
    ))
}

#[instrument(skip(state, jar, body))]
pub async fn refresh_access_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, ApiResponse<TokenPair>), ApiError> {
    let from_cookie = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());
    let from_body = body.and_then(|Json(b)| b.refresh_token).filter(|v| !v.is_empty());
    let incoming = from_cookie
        .or(from_body)
        .ok_or_else(|| ApiError::Unauthorized("Unauthorized request".into()))?;

    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&incoming).map_err(|e| {
        warn!(error = %e, "invalid refresh token");
        ApiError::Unauthorized("Invalid refresh token".into())
    })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid refresh token".into()))?;

    if user.refresh_token.as_deref() != Some(incoming.as_str()) {
        warn!(user_id = %user.id, "refresh token reuse or revoked");
        return Err(ApiError::Unauthorized(
            "Refresh token is expired or used".into(),
        ));
    }

    let pair = rotate_token_pair(&state, user.id, &incoming).await?;

    info!(user_id = %user.id, "access token refreshed");
    let jar = with_session_cookies(jar, &pair);
    Ok((jar, ApiResponse::ok(pair, "Access token refreshed")))
}

#[instrument(skip_all)]
pub async fn current_user(AuthUser(user): AuthUser) -> ApiResponse<PublicUser> {
    ApiResponse::ok(user, "Current user fetched successfully")
}

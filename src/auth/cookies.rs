use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::auth::tokens::TokenPair;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

pub fn with_session_cookies(jar: CookieJar, pair: &TokenPair) -> CookieJar {
    jar.add(build_cookie(ACCESS_COOKIE, pair.access_token.clone()))
        .add(build_cookie(REFRESH_COOKIE, pair.refresh_token.clone()))
}

/// Overwrites both cookies with expired removal cookies, whether or not the
/// request carried them.
pub fn without_session_cookies(jar: CookieJar) -> CookieJar {
    jar.add(removal_cookie(ACCESS_COOKIE))
        .add(removal_cookie(REFRESH_COOKIE))
}

fn removal_cookie(name: &str) -> Cookie<'static> {
    let mut cookie = build_cookie(name, String::new());
    cookie.make_removal();
    cookie
}

fn build_cookie(name: &str, value: String) -> Cookie<'static> {
    Cookie::build(Cookie::new(name.to_string(), value))
        .path("/")
        .http_only(true)
        .secure(true)
        .build()
}

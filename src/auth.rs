//! Shared-secret access gate: a single password unlocks a long-lived cookie.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::routes::{AppState, HtmlTemplate};

pub const AUTH_COOKIE: &str = "pompey-auth";
pub const AUTH_TOKEN: &str = "authenticated";
const COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 30;

const PUBLIC_PATHS: [&str; 3] = ["/login", "/api/login", "/health"];

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub password: String,
}

pub fn is_authenticated(jar: &CookieJar) -> bool {
    jar.get(AUTH_COOKIE)
        .is_some_and(|cookie| cookie.value() == AUTH_TOKEN)
}

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || path.starts_with("/static/")
}

/// With no site password configured every attempt succeeds.
pub fn password_matches(expected: Option<&str>, given: &str) -> bool {
    match expected {
        None => true,
        Some(expected) => expected == given,
    }
}

pub fn auth_cookie(secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::parse(format!(
        "{}={}; Max-Age={}",
        AUTH_COOKIE, AUTH_TOKEN, COOKIE_MAX_AGE_SECS
    ))
    .unwrap_or_else(|_| Cookie::new(AUTH_COOKIE, AUTH_TOKEN));
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(secure);
    cookie
}

pub async fn require_auth(jar: CookieJar, request: Request, next: Next) -> Response {
    if is_authenticated(&jar) || is_public_path(request.uri().path()) {
        return next.run(request).await;
    }
    Redirect::temporary("/login").into_response()
}

pub async fn login_page() -> impl IntoResponse {
    HtmlTemplate(LoginTemplate { error: None })
}

pub async fn login_form(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    if password_matches(state.secrets.site_password.as_deref(), &form.password) {
        info!("Login accepted");
        let jar = jar.add(auth_cookie(state.secrets.production));
        return (jar, Redirect::to("/")).into_response();
    }

    warn!("Rejected login attempt");
    (
        StatusCode::UNAUTHORIZED,
        HtmlTemplate(LoginTemplate {
            error: Some("Incorrect password".to_string()),
        }),
    )
        .into_response()
}

pub async fn api_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(form): Json<LoginForm>,
) -> Response {
    if password_matches(state.secrets.site_password.as_deref(), &form.password) {
        let jar = jar.add(auth_cookie(state.secrets.production));
        return (jar, Json(json!({ "success": true }))).into_response();
    }

    warn!("Rejected login attempt");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Incorrect password" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/login"));
        assert!(is_public_path("/api/login"));
        assert!(is_public_path("/health"));
        assert!(is_public_path("/static/style.css"));
        assert!(!is_public_path("/"));
        assert!(!is_public_path("/api/summary"));
        assert!(!is_public_path("/loginx"));
    }

    #[test]
    fn test_password_matching() {
        assert!(password_matches(None, ""));
        assert!(password_matches(None, "anything"));
        assert!(password_matches(Some("playup"), "playup"));
        assert!(!password_matches(Some("playup"), "PLAYUP"));
        assert!(!password_matches(Some("playup"), ""));
    }

    #[test]
    fn test_auth_cookie_attributes() {
        let cookie = auth_cookie(true);
        assert_eq!(cookie.name(), AUTH_COOKIE);
        assert_eq!(cookie.value(), AUTH_TOKEN);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert!(cookie.to_string().contains("Max-Age=2592000"));
    }

    #[test]
    fn test_cookie_jar_check() {
        let jar = CookieJar::new().add(Cookie::new(AUTH_COOKIE, AUTH_TOKEN));
        assert!(is_authenticated(&jar));

        let jar = CookieJar::new().add(Cookie::new(AUTH_COOKIE, "forged"));
        assert!(!is_authenticated(&jar));
        assert!(!is_authenticated(&CookieJar::new()));
    }

    #[test]
    fn test_login_form_decoding() {
        let form: LoginForm = serde_urlencoded::from_str("password=play+up").unwrap();
        assert_eq!(form.password, "play up");

        let form: LoginForm = serde_urlencoded::from_str("").unwrap();
        assert_eq!(form.password, "");
    }
}

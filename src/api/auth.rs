//! Session-based authentication.
//!
//! Passwords are hashed with Argon2. Login hands out an opaque random
//! token whose SHA-256 hash is stored in the sessions table, so a stolen
//! database dump cannot be replayed as live sessions. The token travels
//! either as a Bearer header or in the session cookie.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::db::{
    actions, resource_types, CurrentSession, DbPool, LoginRequest, LoginResponse, RegisterRequest,
    Session, SessionResponse, User, UserResponse,
};
use crate::AppState;

use super::audit::{audit_log, extract_client_ip};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_name, validate_password};

/// Session token cookie name
pub const SESSION_COOKIE: &str = "lodgr_session";

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn session_cookie(token: &str) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Extract the session token from the Authorization header or cookie
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
}

/// Create a session row and return the raw token plus its expiry
pub async fn create_session(
    pool: &DbPool,
    user_id: &str,
    ttl_days: i64,
) -> Result<(String, String), sqlx::Error> {
    let token = generate_token();
    let token_hash = hash_token(&token);
    let now = chrono::Utc::now();
    let expires_at = (now + chrono::Duration::days(ttl_days)).to_rfc3339();
    let session_id = uuid::Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&session_id)
    .bind(user_id)
    .bind(&token_hash)
    .bind(&expires_at)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok((token, expires_at))
}

/// Resolve a raw token to its session and user. Expired sessions are
/// deleted on sight so the table does not accumulate dead rows.
pub async fn lookup_session(
    pool: &DbPool,
    token: &str,
) -> Result<Option<(Session, User)>, sqlx::Error> {
    let token_hash = hash_token(token);
    let session: Option<Session> = sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ?")
        .bind(&token_hash)
        .fetch_optional(pool)
        .await?;

    let Some(session) = session else {
        return Ok(None);
    };

    if session.is_expired() {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(&session.id)
            .execute(pool)
            .await?;
        return Ok(None);
    }

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&session.user_id)
        .fetch_optional(pool)
        .await?;

    Ok(user.map(|user| (session, user)))
}

/// Get the current user from a token
pub async fn get_current_user(pool: &DbPool, token: &str) -> Result<User, ApiError> {
    match lookup_session(pool, token).await? {
        Some((_, user)) => Ok(user),
        None => Err(ApiError::unauthorized("Invalid or expired session")),
    }
}

/// Register a new account and sign it in
pub async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<LoginResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_name(&request.name) {
        errors.add("name", e);
    }
    if let Err(e) = validate_email(&request.email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password(&request.password) {
        errors.add("password", e);
    }
    errors.finish()?;

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&request.email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict(
            "An account with this email already exists",
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, name, role, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&request.email)
    .bind(&password_hash)
    .bind(&request.name)
    .bind("user")
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    let (token, _) =
        create_session(&state.db, &user.id, state.config.auth.session_ttl_days).await?;

    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        actions::AUTH_REGISTER,
        resource_types::USER,
        Some(&user.id),
        Some(&user.name),
        Some(&user.id),
        ip.as_deref(),
        None,
    )
    .await;

    tracing::info!("Registered new user: {}", user.email);

    let jar = jar.add(session_cookie(&token));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(LoginResponse {
            token,
            user: UserResponse::from(user),
        }),
    ))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    // Find user by email
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&request.email)
        .fetch_optional(&state.db)
        .await?;

    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    // Verify password
    if !verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let (token, _) =
        create_session(&state.db, &user.id, state.config.auth.session_ttl_days).await?;

    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        actions::AUTH_LOGIN,
        resource_types::USER,
        Some(&user.id),
        Some(&user.name),
        Some(&user.id),
        ip.as_deref(),
        None,
    )
    .await;

    let jar = jar.add(session_cookie(&token));
    Ok((
        jar,
        Json(LoginResponse {
            token,
            user: UserResponse::from(user),
        }),
    ))
}

/// Logout endpoint. Deletes the session row and clears the cookie, and
/// succeeds even when no session exists.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    if let Some(token) = extract_token(&headers) {
        if let Some((session, user)) = lookup_session(&state.db, &token).await? {
            sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(&session.id)
                .execute(&state.db)
                .await?;

            let ip = extract_client_ip(&headers, None);
            audit_log(
                &state,
                actions::AUTH_LOGOUT,
                resource_types::USER,
                Some(&user.id),
                Some(&user.name),
                Some(&user.id),
                ip.as_deref(),
                None,
            )
            .await;
        }
    }

    let jar = jar.remove(Cookie::from(SESSION_COOKIE));
    Ok((jar, Json(serde_json::json!({ "success": true }))))
}

/// Report who is signed in. Anonymous visitors get `data: null` with a
/// 200 so the frontend can render either state from one call.
pub async fn session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let data = match extract_token(&headers) {
        Some(token) => lookup_session(&state.db, &token)
            .await?
            .map(|(session, user)| CurrentSession {
                user: UserResponse::from(user),
                expires_at: session.expires_at,
            }),
        None => None,
    };

    Ok(Json(SessionResponse { data }))
}

/// Extractor for getting the current authenticated user from a request
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        get_current_user(&state.db, &token).await
    }
}

/// Extractor that admits only administrators.
///
/// Anonymous visitors and signed-in regular users are rejected with the
/// same 403 so the moderation surface does not reveal which accounts exist.
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let forbidden = || ApiError::forbidden("Administrator access required");

        let token = extract_token(&parts.headers).ok_or_else(forbidden)?;
        let user = match lookup_session(&state.db, &token).await? {
            Some((_, user)) => user,
            None => return Err(forbidden()),
        };

        if !user.is_admin() {
            return Err(forbidden());
        }

        Ok(AdminUser(user))
    }
}

/// Ensure a default admin account exists, seeding one on first start.
/// Without a configured password a random one is generated and logged once.
pub async fn ensure_admin_user(
    pool: &DbPool,
    email: &str,
    password: &Option<String>,
) -> anyhow::Result<()> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin'")
        .fetch_one(pool)
        .await?;
    if count.0 > 0 {
        return Ok(());
    }

    let (password, generated) = match password {
        Some(p) => (p.clone(), false),
        None => (generate_token()[..16].to_string(), true),
    };

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let password_hash = hash_password(&password)
        .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, name, role, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(email)
    .bind(&password_hash)
    .bind("Administrator")
    .bind("admin")
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    if generated {
        tracing::warn!(
            "Created admin user {} with generated password: {}",
            email,
            password
        );
    } else {
        tracing::info!("Created admin user {}", email);
    }

    let _ = crate::db::log_audit(
        pool,
        actions::AUTH_SETUP,
        resource_types::USER,
        Some(&id),
        Some("Administrator"),
        None,
        None,
        None,
    )
    .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_tokens_are_unique_and_hash_deterministic() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), hash_token(&b));
    }

    #[test]
    fn test_extract_token_prefers_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer abc123".parse().unwrap());
        headers.insert(
            "Cookie",
            format!("{}=cookie-token", SESSION_COOKIE).parse().unwrap(),
        );
        assert_eq!(extract_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Cookie",
            format!("{}=cookie-token", SESSION_COOKIE).parse().unwrap(),
        );
        assert_eq!(extract_token(&headers), Some("cookie-token".to_string()));

        assert_eq!(extract_token(&HeaderMap::new()), None);
    }

    async fn insert_user(pool: &DbPool, email: &str, role: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(email)
        .bind("x")
        .bind("Test User")
        .bind(role)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_and_lookup_session() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let user_id = insert_user(&pool, "guest@example.com", "user").await;

        let (token, _expires) = create_session(&pool, &user_id, 7).await.unwrap();

        let found = lookup_session(&pool, &token).await.unwrap();
        let (session, user) = found.expect("session should resolve");
        assert_eq!(session.user_id, user_id);
        assert_eq!(user.email, "guest@example.com");

        assert!(lookup_session(&pool, "bogus-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_dropped() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let user_id = insert_user(&pool, "guest@example.com", "user").await;

        let token = generate_token();
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&user_id)
        .bind(hash_token(&token))
        .bind("2020-01-01T00:00:00+00:00")
        .bind("2019-12-25T00:00:00+00:00")
        .execute(&pool)
        .await
        .unwrap();

        assert!(lookup_session(&pool, &token).await.unwrap().is_none());

        // The stale row is gone after the failed lookup
        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining.0, 0);
    }

    #[tokio::test]
    async fn test_get_current_user_rejects_unknown_token() {
        let pool = crate::db::init_in_memory().await.unwrap();
        let err = get_current_user(&pool, "nope").await.unwrap_err();
        assert_eq!(
            err.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_register_login_logout_roundtrip() {
        let db = crate::db::init_in_memory().await.unwrap();
        let state = Arc::new(crate::AppState::new(crate::config::Config::default(), db));

        let (status, _, Json(registered)) = register(
            State(state.clone()),
            CookieJar::new(),
            HeaderMap::new(),
            Json(RegisterRequest {
                name: "Frida Guest".to_string(),
                email: "frida@example.com".to_string(),
                password: "a-long-password".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(registered.user.role, "user");

        let (_, Json(signed_in)) = login(
            State(state.clone()),
            CookieJar::new(),
            HeaderMap::new(),
            Json(LoginRequest {
                email: "frida@example.com".to_string(),
                password: "a-long-password".to_string(),
            }),
        )
        .await
        .unwrap();

        let Json(probe) = session(State(state.clone()), bearer(&signed_in.token))
            .await
            .unwrap();
        let current = probe.data.expect("session should resolve after login");
        assert_eq!(current.user.email, "frida@example.com");

        logout(
            State(state.clone()),
            CookieJar::new(),
            bearer(&signed_in.token),
        )
        .await
        .unwrap();

        let Json(probe) = session(State(state.clone()), bearer(&signed_in.token))
            .await
            .unwrap();
        assert!(probe.data.is_none());
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let db = crate::db::init_in_memory().await.unwrap();
        let state = Arc::new(crate::AppState::new(crate::config::Config::default(), db));

        let err = login(
            State(state.clone()),
            CookieJar::new(),
            HeaderMap::new(),
            Json(LoginRequest {
                email: "nobody@example.com".to_string(),
                password: "whatever-password".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ensure_admin_user_is_idempotent() {
        let pool = crate::db::init_in_memory().await.unwrap();

        ensure_admin_user(&pool, "admin@localhost", &Some("hunter2hunter2".to_string()))
            .await
            .unwrap();
        ensure_admin_user(&pool, "admin@localhost", &Some("hunter2hunter2".to_string()))
            .await
            .unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);

        let admin: User = sqlx::query_as("SELECT * FROM users WHERE role = 'admin'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(verify_password("hunter2hunter2", &admin.password_hash));
    }
}

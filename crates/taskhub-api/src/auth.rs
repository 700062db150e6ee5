use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand_core::OsRng;
use tracing::debug;
use uuid::Uuid;

use taskhub_db::Database;
use taskhub_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use taskhub_types::models::{Role, User};

use crate::error::{ApiError, ValidationErrors, blocking};
use crate::events::EventBus;
use crate::extract::JsonBody;
use crate::projects::ProjectService;
use crate::tasks::TaskService;

const TOKEN_TTL_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    /// Usernames that are given the admin role when they register.
    pub admin_usernames: Vec<String>,
    pub events: EventBus,
}

impl AppStateInner {
    pub fn projects(&self) -> ProjectService<'_> {
        ProjectService::new(&self.db)
    }

    pub fn tasks(&self) -> TaskService<'_> {
        TaskService::new(&self.db, &self.events)
    }

    fn role_for(&self, username: &str) -> Role {
        if self.admin_usernames.iter().any(|admin| admin == username) {
            Role::Admin
        } else {
            Role::User
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors = ValidationErrors::new();
    let username_len = req.username.chars().count();
    if !(3..=32).contains(&username_len) {
        errors.add("username", "The username field must be between 3 and 32 characters.");
    }
    if !req.email.contains('@') {
        errors.add("email", "The email field must be a valid email address.");
    }
    if req.password.chars().count() < 8 {
        errors.add("password", "The password field must be at least 8 characters.");
    }
    ApiError::check(errors)?;

    let role = state.role_for(&req.username);
    let user = User {
        id: Uuid::new_v4(),
        username: req.username,
        email: req.email,
        role,
        created_at: Utc::now(),
    };

    let db_state = state.clone();
    let user = blocking(move || {
        if db_state.db.get_user_by_username(&user.username)?.is_some() {
            return Err(username_taken());
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
            .to_string();

        // A concurrent registration may have taken the name since the check.
        if !db_state.db.create_user(&user, &password_hash)? {
            return Err(username_taken());
        }
        Ok(user)
    })
    .await?;

    let token = create_token(&state.jwt_secret, &user)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db_state = state.clone();
    let user = blocking(move || {
        let row = db_state
            .db
            .get_user_by_username(&req.username)?
            .ok_or(ApiError::InvalidCredentials)?;

        let parsed_hash = PasswordHash::new(&row.password)
            .map_err(|e| anyhow::anyhow!("stored hash for {} is unreadable: {}", row.username, e))?;
        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .map_err(|_| ApiError::InvalidCredentials)?;

        Ok(User::try_from(&row)?)
    })
    .await?;

    let token = create_token(&state.jwt_secret, &user)?;
    Ok(Json(AuthResponse { user, token }))
}

/// POST /logout: revoke the token the request was made with.
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let expires_at = DateTime::from_timestamp(claims.exp as i64, 0).ok_or(ApiError::Internal)?;
    let username = claims.username.clone();
    blocking(move || Ok(state.db.revoke_token(claims.jti, &expires_at, &Utc::now())?)).await?;

    debug!("User {} logged out", username);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /user: the authenticated user.
pub async fn me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

pub fn create_token(secret: &str, user: &User) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id,
        jti: Uuid::new_v4(),
        username: user.username.clone(),
        exp: (Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn username_taken() -> ApiError {
    let mut errors = ValidationErrors::new();
    errors.add("username", "The username has already been taken.");
    ApiError::Validation(errors)
}

pub fn decode_token(secret: &str, token: &str) -> anyhow::Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

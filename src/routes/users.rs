use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::db::{self, NewUser, User};
use crate::error::AppError;
use crate::state::AppState;

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(new_user): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    if new_user.email.trim().is_empty() || !new_user.email.contains('@') {
        return Err(AppError::Validation("a valid email is required".to_string()));
    }
    if new_user.password.len() < 8 {
        return Err(AppError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(new_user.password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))?
        .to_string();

    let user = db::register_user(state.pool.as_ref(), &new_user, &password_hash).await?;
    info!("registered user {}", user.user_id.as_deref().unwrap_or("?"));

    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(login): Json<LoginRequest>,
) -> Result<Json<User>, AppError> {
    if login.password.is_empty() {
        return Err(AppError::Validation("password is required".to_string()));
    }

    let user = db::find_user_by_email(state.pool.as_ref(), &login.email)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user not found with email: {}", login.email)))?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| AppError::Internal(format!("stored hash unreadable: {}", e)))?;

    Argon2::default()
        .verify_password(login.password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::Unauthorized("invalid credentials".to_string()))?;

    Ok(Json(user))
}

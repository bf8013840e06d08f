mod password;
mod session;

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tracing::warn;

use crate::{
    api::errors::AppError,
    db::{
        models::{Device, User},
        store::Store,
    },
    errors::Error,
};

pub use password::{hash_password, is_strong, verify_password, DEFAULT_ITERATIONS};
pub use session::SessionSigner;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_LENGTH: usize = 32;

/// A fresh random alphanumeric device API key.
pub fn generate_api_key() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// The active device owning the request's `x-api-key`.
#[derive(Debug, Clone)]
pub struct AuthDevice(pub Device);

impl<S> FromRequestParts<S> for AuthDevice
where
    Arc<dyn Store>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let store = Arc::<dyn Store>::from_ref(state);

        let api_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::unauthorized("API key required"))?;

        match store.active_device_by_api_key(api_key).await? {
            Some(device) => Ok(AuthDevice(device)),
            None => {
                warn!("Rejected device request with unknown or inactive API key");
                Err(Error::unauthorized("Invalid API key or device inactive").into())
            }
        }
    }
}

/// The user behind a valid `Authorization: Bearer` session token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<dyn Store>: FromRef<S>,
    SessionSigner: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let store = Arc::<dyn Store>::from_ref(state);
        let signer = SessionSigner::from_ref(state);

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::unauthorized("Access token required"))?;

        let user_id = signer
            .verify(token)
            .ok_or_else(|| Error::unauthorized("Invalid token"))?;

        match store.user_by_id(user_id).await {
            Ok(user) => Ok(AuthUser(user)),
            Err(Error::NotFound(_)) => Err(Error::unauthorized("User not found").into()),
            Err(e) => Err(e.into()),
        }
    }
}

/// An [`AuthUser`] holding the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

impl<S> FromRequestParts<S> for AdminUser
where
    Arc<dyn Store>: FromRef<S>,
    SessionSigner: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(Error::forbidden("Admin access required").into());
        }
        Ok(AdminUser(user))
    }
}

use axum::{extract::State, http::StatusCode, Json};
use tracing::info;

use crate::{
    api::{
        dto::{
            done, ok, AuthSession, ChangePasswordRequest, Envelope, LoginRequest, ProfileDto,
            RegisterRequest,
        },
        errors::AppError,
        AppState,
    },
    auth::{self, AuthUser},
    db::models::{NewUser, Role, UserPatch},
    errors::Error,
};

const WEAK_PASSWORD: &str =
    "Password must be at least 8 characters with uppercase, lowercase, and number";
const WEAK_NEW_PASSWORD: &str =
    "New password must be at least 8 characters with uppercase, lowercase, and number";

/// Create an account and open a session for it. The very first account
/// becomes the administrator.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = AuthSession),
        (status = 400, description = "Missing field, bad email or weak password"),
        (status = 409, description = "Email or username already in use"),
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Envelope<AuthSession>>), AppError> {
    let (Some(username), Some(email), Some(password)) = (
        non_blank(req.username),
        non_blank(req.email),
        req.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(Error::validation("Username, email, and password are required").into());
    };

    if !is_valid_email(&email) {
        return Err(Error::validation("Invalid email format").into());
    }
    if !auth::is_strong(&password) {
        return Err(Error::validation(WEAK_PASSWORD).into());
    }

    if state.store.user_by_email(&email).await?.is_some() {
        return Err(Error::Duplicate("Email already registered".to_owned()).into());
    }
    if state.store.user_by_username(&username).await?.is_some() {
        return Err(Error::Duplicate("Username already taken".to_owned()).into());
    }

    let role = if state.store.count_users().await? == 0 {
        Role::Admin
    } else {
        Role::User
    };
    let user = state
        .store
        .create_user(NewUser {
            username,
            email,
            password_hash: auth::hash_password(&password, state.password_iterations)?,
            role,
        })
        .await?;
    info!(user_id = user.id, role = %user.role, "User registered");

    let token = state.sessions.issue(user.id);
    Ok((
        StatusCode::CREATED,
        ok(
            "User registered successfully",
            AuthSession {
                user: (&user).into(),
                token,
            },
        ),
    ))
}

/// Exchange email and password for a session token.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthSession),
        (status = 400, description = "Missing email or password"),
        (status = 401, description = "Invalid credentials"),
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Envelope<AuthSession>>, AppError> {
    let password = req.password.filter(|p| !p.is_empty());
    let (Some(email), Some(password)) = (non_blank(req.email), password) else {
        return Err(Error::validation("Email and password are required").into());
    };

    let user = state
        .store
        .user_by_email(&email)
        .await?
        .filter(|user| auth::verify_password(&password, &user.password_hash))
        .ok_or_else(|| Error::unauthorized("Invalid credentials"))?;

    let token = state.sessions.issue(user.id);
    Ok(ok(
        "Login successful",
        AuthSession {
            user: (&user).into(),
            token,
        },
    ))
}

#[utoipa::path(
    get,
    path = "/api/auth/profile",
    responses(
        (status = 200, description = "The caller's profile", body = ProfileDto),
        (status = 401, description = "Missing or invalid token"),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn profile(AuthUser(user): AuthUser) -> Json<Envelope<ProfileDto>> {
    ok("Profile retrieved successfully", ProfileDto::from(&user))
}

/// Change the caller's username and/or email. Blank fields are ignored.
#[utoipa::path(
    put,
    path = "/api/auth/profile",
    request_body = UserPatch,
    responses(
        (status = 200, description = "Profile updated", body = ProfileDto),
        (status = 400, description = "Nothing to update or bad email"),
        (status = 401, description = "Missing or invalid token"),
        (status = 409, description = "Email or username already in use"),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(patch): Json<UserPatch>,
) -> Result<Json<Envelope<ProfileDto>>, AppError> {
    let patch = UserPatch {
        username: non_blank(patch.username),
        email: non_blank(patch.email),
    };
    if patch.is_empty() {
        return Err(Error::validation("No valid fields to update").into());
    }
    if patch.email.as_deref().is_some_and(|email| !is_valid_email(email)) {
        return Err(Error::validation("Invalid email format").into());
    }

    let updated = state.store.update_user(user.id, &patch).await?;
    info!(user_id = user.id, "Profile updated");
    Ok(ok("Profile updated successfully", ProfileDto::from(&updated)))
}

#[utoipa::path(
    put,
    path = "/api/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Missing field or weak new password"),
        (status = 401, description = "Current password is incorrect"),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<Envelope<()>>, AppError> {
    let (Some(current), Some(new)) = (
        req.current_password.filter(|p| !p.is_empty()),
        req.new_password.filter(|p| !p.is_empty()),
    ) else {
        return Err(
            Error::validation("Current password and new password are required").into(),
        );
    };

    if !auth::is_strong(&new) {
        return Err(Error::validation(WEAK_NEW_PASSWORD).into());
    }
    if !auth::verify_password(&current, &user.password_hash) {
        return Err(Error::unauthorized("Current password is incorrect").into());
    }

    let hash = auth::hash_password(&new, state.password_iterations)?;
    state.store.set_user_password(user.id, &hash).await?;
    info!(user_id = user.id, "Password changed");

    Ok(done("Password changed successfully"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// `local@domain.tld` with no whitespace and exactly one `@`.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

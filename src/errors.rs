use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource not found".to_owned()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // unique_violation
                Some("23505") => Self::Duplicate(duplicate_message(db.constraint())),
                // foreign_key_violation
                Some("23503") => Self::NotFound("Device not found".to_owned()),
                _ => Self::StoreUnavailable(err.to_string()),
            },
            _ => Self::StoreUnavailable(err.to_string()),
        }
    }
}

fn duplicate_message(constraint: Option<&str>) -> String {
    match constraint {
        Some("devices_device_id_key") => "Device ID already exists",
        Some("devices_api_key_key") => "API key already in use",
        Some("users_email_key") => "Email already registered",
        Some("users_username_key") => "Username already taken",
        _ => "Duplicate entry",
    }
    .to_owned()
}

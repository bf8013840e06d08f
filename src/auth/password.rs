use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::{Error, Result};

const HASH_PREFIX: &str = "pbkdf2_sha256";
pub const DEFAULT_ITERATIONS: u32 = 200_000;
const SALT_BYTES: usize = 16;
const DERIVED_BYTES: usize = 32;
const MIN_LENGTH: usize = 8;
const ALLOWED_SYMBOLS: &str = "@$!%*?&";

/// Hash as `pbkdf2_sha256$<iterations>$<salt>$<hash>` (unpadded base64).
pub fn hash_password(password: &str, iterations: u32) -> Result<String> {
    if password.is_empty() {
        return Err(Error::validation("Password cannot be blank"));
    }

    let mut salt = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt);
    let derived = derive(password.as_bytes(), &salt, iterations);

    Ok(format!(
        "{HASH_PREFIX}${iterations}${}${}",
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(derived)
    ))
}

/// Malformed hashes never verify.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    if password.is_empty() {
        return false;
    }

    let mut parts = password_hash.splitn(4, '$');
    let (Some(prefix), Some(iterations), Some(salt), Some(expected)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if prefix != HASH_PREFIX {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(expected))
    else {
        return false;
    };

    let derived = derive(password.as_bytes(), &salt, iterations);
    derived.ct_eq(expected.as_slice()).into()
}

/// At least eight characters from letters, digits and `@$!%*?&`, with at
/// least one lowercase letter, one uppercase letter and one digit.
pub fn is_strong(password: &str) -> bool {
    password.chars().count() >= MIN_LENGTH
        && password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ALLOWED_SYMBOLS.contains(c))
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

fn derive(password: &[u8], salt: &[u8], iterations: u32) -> [u8; DERIVED_BYTES] {
    let mut out = [0u8; DERIVED_BYTES];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}

use argon2::Argon2;
use password_hash::{PasswordHash, PasswordVerifier};

/// Check a room password against its stored argon2 hash.
///
/// A malformed stored hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("stored room password hash is malformed");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// `verify_password` on the blocking pool, keeping argon2 off the async
/// workers.
pub async fn verify_password_blocking(password: String, hash: String) -> bool {
    match tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await {
        Ok(matched) => matched,
        Err(err) => {
            tracing::error!(?err, "password verification task failed");
            false
        }
    }
}

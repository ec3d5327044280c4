//! Access-token verification for gateway and HTTP callers.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::gateway::session::SessionUser;
use crate::stores::UserDirectory;

/// Claims carried by access tokens issued at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Turns a presented credential into a session identity.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<SessionUser, GatewayError>;
}

/// Verifies HS256 access tokens and confirms the account is still active.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    directory: Arc<dyn UserDirectory>,
}

impl JwtVerifier {
    pub fn new(secret: &str, directory: Arc<dyn UserDirectory>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            directory,
        }
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<SessionUser, GatewayError> {
        let claims = jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(?e, "access token validation failed");
                GatewayError::authentication("Invalid or expired token")
            })?
            .claims;

        let user = self
            .directory
            .find(&claims.id)
            .await
            .map_err(|err| {
                tracing::error!(?err, user_id = %claims.id, "user lookup failed during authentication");
                GatewayError::authentication("Authentication unavailable")
            })?
            .ok_or_else(|| GatewayError::authentication("User not found"))?;

        if !user.is_active {
            return Err(GatewayError::authentication("Account is disabled"));
        }

        Ok(SessionUser {
            user_id: user.id,
            display_name: user.name,
            role: user.role,
        })
    }
}

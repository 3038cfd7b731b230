//! Caller identity
//!
//! Requests carry `Authorization: Bearer <token>`. Token verification is
//! delegated to an [`IdentityVerifier`]; the rest of the crate only sees the
//! verified user id.

use crate::error::OrchestrationError;
use crate::models::Caller;
use crate::Result;

#[async_trait::async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a bearer token and return the user id it belongs to.
    async fn verify(&self, token: &str) -> Result<String>;
}

/// Treats the token itself as the user id. For local development only.
pub struct DevTokenVerifier;

#[async_trait::async_trait]
impl IdentityVerifier for DevTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String> {
        let uid = token.trim();
        if uid.is_empty() || uid.contains('/') {
            return Err(OrchestrationError::AuthError("Invalid token".to_string()));
        }
        Ok(uid.to_string())
    }
}

/// Extract the token from an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    let header =
        header.ok_or_else(|| OrchestrationError::AuthError("Missing Authorization header".to_string()))?;

    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(OrchestrationError::AuthError(
            "Authorization header must be 'Bearer <token>'".to_string(),
        )),
    }
}

pub async fn authenticate(verifier: &dyn IdentityVerifier, header: Option<&str>) -> Result<Caller> {
    let token = bearer_token(header)?;
    let uid = verifier.verify(token).await?;
    Ok(Caller::authenticated(uid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(Some("bearer  abc ")).unwrap(), "abc");
        assert!(bearer_token(None).is_err());
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer ")).is_err());
    }

    #[tokio::test]
    async fn test_authenticate_yields_caller() {
        let caller = authenticate(&DevTokenVerifier, Some("Bearer user-7")).await.unwrap();
        assert_eq!(caller.session_id, "user-7");
        assert_eq!(caller.principal_id.as_deref(), Some("user-7"));

        let err = authenticate(&DevTokenVerifier, Some("Bearer ../x")).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
}

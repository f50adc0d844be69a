use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::error::GatewayError;

use super::{Claims, Credentials, Identity, IdentityResolver};

/// Resolves identities from JWTs signed by the auth service
pub struct JwtIdentityResolver {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, GatewayError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| GatewayError::Identity(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, credentials: &Credentials) -> Result<Identity, GatewayError> {
        let token = credentials
            .token
            .as_deref()
            .ok_or_else(|| GatewayError::Identity("Missing authentication token".to_string()))?;

        let claims = self.validate(token)?;
        // Tokens minted without a session get a per-connection one
        let session_id = claims
            .sid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let identity = Identity::new(claims.sub, session_id);
        identity.user_topic()?;
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use tokio_test::{assert_err, assert_ok};

    fn create_test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            issuer: None,
            audience: None,
        }
    }

    fn create_test_token(sid: Option<&str>, secret: &str, exp_offset: i64) -> String {
        create_token_for("user-123", sid, secret, exp_offset)
    }

    fn create_token_for(sub: &str, sid: Option<&str>, secret: &str, exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            exp: now + exp_offset,
            iat: now,
            sid: sid.map(str::to_string),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_valid_token() {
        let config = create_test_config();
        let resolver = JwtIdentityResolver::new(&config);
        let token = create_test_token(Some("sess-1"), &config.secret, 3600);

        let identity = assert_ok!(resolver.resolve(&Credentials { token: Some(token) }).await);

        assert_eq!(identity, Identity::new("user-123", "sess-1"));
    }

    #[tokio::test]
    async fn test_missing_session_gets_generated() {
        let config = create_test_config();
        let resolver = JwtIdentityResolver::new(&config);
        let token = create_test_token(None, &config.secret, 3600);

        let identity = resolver
            .resolve(&Credentials { token: Some(token) })
            .await
            .unwrap();

        assert_eq!(identity.user_id, "user-123");
        assert!(Uuid::parse_str(&identity.session_id).is_ok());
    }

    #[tokio::test]
    async fn test_rejects_bad_tokens() {
        let config = create_test_config();
        let resolver = JwtIdentityResolver::new(&config);

        let missing = resolver.resolve(&Credentials::default()).await;
        assert!(matches!(missing, Err(GatewayError::Identity(_))));

        assert_err!(
            resolver
                .resolve(&Credentials { token: Some("invalid-token".into()) })
                .await
        );

        let wrong_key = create_test_token(Some("s"), "another-secret", 3600);
        assert_err!(resolver.resolve(&Credentials { token: Some(wrong_key) }).await);

        let expired = create_test_token(Some("s"), &config.secret, -3600);
        assert_err!(resolver.resolve(&Credentials { token: Some(expired) }).await);
    }

    #[tokio::test]
    async fn test_provider_style_subjects_resolve() {
        let config = create_test_config();
        let resolver = JwtIdentityResolver::new(&config);

        for sub in ["auth0|42", "jane@example.com"] {
            let token = create_token_for(sub, Some("s"), &config.secret, 3600);
            let identity = assert_ok!(resolver.resolve(&Credentials { token: Some(token) }).await);
            assert_eq!(identity.user_id, sub);
        }
    }

    #[tokio::test]
    async fn test_unaddressable_subject_is_rejected() {
        let config = create_test_config();
        let resolver = JwtIdentityResolver::new(&config);
        let token = create_token_for("", Some("s"), &config.secret, 3600);

        let err = assert_err!(resolver.resolve(&Credentials { token: Some(token) }).await);
        assert!(matches!(err, GatewayError::Identity(_)));
    }
}

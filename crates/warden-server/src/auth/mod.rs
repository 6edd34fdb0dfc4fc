// crates/warden-server/src/auth/mod.rs
// Bearer-key and JWT authentication

pub mod rate_limit;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub use rate_limit::{LimitClass, RateDecision, RateLimiter};

use crate::config::AuthConfig;
use crate::error::{Result, WardenError};

/// Which configured secret authenticated the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalClass {
    Mcp,
    Ide,
}

impl PrincipalClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalClass::Mcp => "mcp",
            PrincipalClass::Ide => "ide",
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct Principal {
    pub class: PrincipalClass,
    /// SHA-256 hash prefix of the presented credential; the audit actor.
    pub actor: String,
}

/// Hash prefix used as the actor identity in audit events. Never the key.
pub fn actor_hash(credential: &str) -> String {
    let digest = Sha256::digest(credential.as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    iat: u64,
    exp: u64,
}

/// Authenticates bearer credentials: the two configured API keys, or a
/// JWT session token minted by this server.
pub struct Authenticator {
    mcp_key: String,
    ide_key: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    expiry: Duration,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.jwt_issuer.clone()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = config.jwt_clock_skew.as_secs();

        Self {
            mcp_key: config.mcp_api_key.clone(),
            ide_key: config.ide_api_key.clone(),
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
            expiry: config.jwt_expiry,
        }
    }

    /// Verify a bearer credential. Keys are compared constant-time; a
    /// credential that matches neither key is tried as a JWT.
    pub fn verify_bearer(&self, credential: &str) -> Result<Principal> {
        if !self.mcp_key.is_empty() && constant_time_eq(credential, &self.mcp_key) {
            return Ok(Principal {
                class: PrincipalClass::Mcp,
                actor: actor_hash(credential),
            });
        }
        if !self.ide_key.is_empty() && constant_time_eq(credential, &self.ide_key) {
            return Ok(Principal {
                class: PrincipalClass::Ide,
                actor: actor_hash(credential),
            });
        }
        if credential.matches('.').count() == 2 {
            let claims = self.verify_jwt(credential)?;
            return Ok(Principal {
                class: PrincipalClass::Mcp,
                actor: actor_hash(&claims.sub),
            });
        }
        Err(WardenError::Unauthorized("invalid credentials".into()))
    }

    /// Mint a session JWT for an MCP client.
    pub fn issue_session_token(&self, subject: &str) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = Claims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.expiry.as_secs(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| WardenError::Internal(format!("jwt encode: {e}")))
    }

    fn verify_jwt(&self, token: &str) -> Result<Claims> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| WardenError::Unauthorized(format!("invalid session token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            mcp_api_key: "mcp-key-0123456789-0123456789-abcdef".into(),
            ide_api_key: "ide-key-0123456789-0123456789-abcdef".into(),
            jwt_secret: "0123456789abcdef0123456789abcdef".into(),
            jwt_issuer: "warden".into(),
            jwt_expiry: Duration::from_secs(3600),
            jwt_rotation: Duration::from_secs(86400),
            jwt_clock_skew: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_api_key_classes() {
        let auth = Authenticator::new(&config());
        let mcp = auth
            .verify_bearer("mcp-key-0123456789-0123456789-abcdef")
            .unwrap();
        assert_eq!(mcp.class, PrincipalClass::Mcp);
        let ide = auth
            .verify_bearer("ide-key-0123456789-0123456789-abcdef")
            .unwrap();
        assert_eq!(ide.class, PrincipalClass::Ide);
        assert_ne!(mcp.actor, ide.actor);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let auth = Authenticator::new(&config());
        let err = auth.verify_bearer("not-a-key").unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
    }

    #[test]
    fn test_actor_is_hash_prefix_not_key() {
        let actor = actor_hash("mcp-key-0123456789-0123456789-abcdef");
        assert_eq!(actor.len(), 16);
        assert!(!actor.contains("mcp-key"));
    }

    #[test]
    fn test_jwt_roundtrip() {
        let auth = Authenticator::new(&config());
        let token = auth.issue_session_token("session-1").unwrap();
        let principal = auth.verify_bearer(&token).unwrap();
        assert_eq!(principal.class, PrincipalClass::Mcp);
        assert_eq!(principal.actor, actor_hash("session-1"));
    }

    #[test]
    fn test_jwt_wrong_issuer_rejected() {
        let auth = Authenticator::new(&config());
        let mut other_config = config();
        other_config.jwt_issuer = "someone-else".into();
        let other = Authenticator::new(&other_config);

        let token = other.issue_session_token("session-1").unwrap();
        assert!(auth.verify_bearer(&token).is_err());
    }

    #[test]
    fn test_jwt_wrong_signature_rejected() {
        let auth = Authenticator::new(&config());
        let mut other_config = config();
        other_config.jwt_secret = "ffffffffffffffffffffffffffffffff".into();
        let other = Authenticator::new(&other_config);

        let token = other.issue_session_token("session-1").unwrap();
        assert!(auth.verify_bearer(&token).is_err());
    }

    #[test]
    fn test_expired_jwt_rejected_beyond_skew() {
        let mut c = config();
        c.jwt_clock_skew = Duration::from_secs(0);
        let auth = Authenticator::new(&c);

        // Hand-build an expired token with the same secret.
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let claims = Claims {
            sub: "s".into(),
            iss: "warden".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(c.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(auth.verify_bearer(&token).is_err());
    }
}

//! Token issuance and verification for `user` and `livestream` principals.
//! Admin and internal principals authenticate with opaque bearer strings
//! matched against configuration and never pass through this module.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::PrincipalId;

/// Token expiration is set to at least twice the operational limit it
/// bounds (data model invariant), so a session that hits its time limit
/// still has a token that out-lives the disconnect long enough for the
/// watchdog and any retry to observe it as expired-but-consistent.
const EXPIRATION_MULTIPLIER: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub user_id: String,
    pub max_queue_songs: u32,
    pub max_add_requests: u32,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivestreamClaims {
    pub user_id: String,
    pub max_streaming_seconds: u64,
    pub show_name: Option<String>,
    pub min_recording_duration: u64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtService {
    secret: String,
    leeway_seconds: u64,
}

impl JwtService {
    #[must_use]
    pub fn new(secret: String, leeway_seconds: u64) -> Self {
        Self {
            secret,
            leeway_seconds,
        }
    }

    fn header() -> Header {
        Header::new(Algorithm::HS256)
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(self.secret.as_bytes())
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_seconds;
        validation
    }

    /// Issues a user token valid for `duration_seconds` (caller-supplied,
    /// capped at 86400 by the Control API before this is called).
    pub fn issue_user_token(
        &self,
        max_queue_songs: u32,
        max_add_requests: u32,
        duration_seconds: i64,
    ) -> Result<String> {
        let claims = UserClaims {
            user_id: PrincipalId::new().to_string(),
            max_queue_songs,
            max_add_requests,
            exp: (Utc::now() + chrono::Duration::seconds(duration_seconds)).timestamp(),
        };
        Ok(encode(&Self::header(), &claims, &self.encoding_key())?)
    }

    /// Issues a livestream token. Unlike user tokens, the caller does not
    /// supply a duration directly: expiration is derived from
    /// `max_streaming_seconds` per the data model invariant.
    pub fn issue_livestream_token(
        &self,
        max_streaming_seconds: u64,
        show_name: Option<String>,
        min_recording_duration: u64,
    ) -> Result<String> {
        let duration_seconds = (max_streaming_seconds * EXPIRATION_MULTIPLIER) as i64;
        let claims = LivestreamClaims {
            user_id: PrincipalId::new().to_string(),
            max_streaming_seconds,
            show_name,
            min_recording_duration,
            exp: (Utc::now() + chrono::Duration::seconds(duration_seconds)).timestamp(),
        };
        Ok(encode(&Self::header(), &claims, &self.encoding_key())?)
    }

    pub fn verify_user_token(&self, token: &str) -> Result<UserClaims> {
        let decoding_key = DecodingKey::from_secret(self.secret.as_bytes());
        let data = decode::<UserClaims>(token, &decoding_key, &self.validation())?;
        Ok(data.claims)
    }

    pub fn verify_livestream_token(&self, token: &str) -> Result<LivestreamClaims> {
        let decoding_key = DecodingKey::from_secret(self.secret.as_bytes());
        let data = decode::<LivestreamClaims>(token, &decoding_key, &self.validation())?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new("test-secret-at-least-32-bytes-long".to_string(), 5)
    }

    #[test]
    fn user_token_round_trips() {
        let svc = service();
        let token = svc.issue_user_token(5, 10, 3600).unwrap();
        let claims = svc.verify_user_token(&token).unwrap();
        assert_eq!(claims.max_queue_songs, 5);
        assert_eq!(claims.max_add_requests, 10);
    }

    #[test]
    fn livestream_token_expiration_is_double_the_limit() {
        let svc = service();
        let token = svc.issue_livestream_token(100, Some("show".to_string()), 10).unwrap();
        let claims = svc.verify_livestream_token(&token).unwrap();
        let now = Utc::now().timestamp();
        let expected = now + 200;
        assert!((claims.exp - expected).abs() < 5);
    }

    #[test]
    fn wrong_claim_shape_fails_to_decode() {
        let svc = service();
        let token = svc.issue_user_token(5, 10, 3600).unwrap();
        assert!(svc.verify_livestream_token(&token).is_err());
    }

    #[test]
    fn tampered_token_fails_verification() {
        let svc = service();
        let token = svc.issue_user_token(5, 10, 3600).unwrap();
        let other = JwtService::new("different-secret-thats-32-bytes!".to_string(), 5);
        assert!(other.verify_user_token(&token).is_err());
    }
}

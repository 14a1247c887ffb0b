use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AppConfig;

/// Mints and verifies the two token kinds. Access and refresh tokens share
/// the signing key but carry distinct audiences, so one can never be
/// presented where the other is expected.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_audience: String,
    access_expiry: Duration,
    refresh_audience: String,
    refresh_expiry: Duration,
}

impl TokenService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            access_audience: config.access_token_audience.clone(),
            access_expiry: Duration::minutes(config.access_token_expiry_minutes),
            refresh_audience: config.refresh_token_audience.clone(),
            refresh_expiry: Duration::days(config.refresh_token_expiry_days),
        })
    }

    pub fn access_token(&self, user_id: Uuid, role: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.access_expiry;
        let claims = AccessClaims {
            sub: user_id,
            role: role.to_owned(),
            iss: self.issuer.clone(),
            aud: self.access_audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn refresh_token(&self, user_id: Uuid) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.refresh_expiry;
        let claims = RefreshClaims {
            sub: user_id,
            iss: self.issuer.clone(),
            aud: self.refresh_audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.access_audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<AccessClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    /// Signature and expiry only; callers must additionally compare
    /// [`token_digest`] against the single slot stored on the user row.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.refresh_audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<RefreshClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

/// The raw refresh token never touches the database; only this digest does.
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

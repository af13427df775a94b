use std::collections::HashSet;

use jsonwebtoken::{
    decode, encode, errors::Error, Algorithm, DecodingKey, EncodingKey, Header, TokenData,
    Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum acceptable size for the JWT secret in bytes.
pub const MIN_JWT_SECRET_LENGTH: usize = 32;
/// Minimum number of unique bytes expected for the JWT secret to avoid trivially guessable values.
const MIN_UNIQUE_JWT_BYTES: usize = 8;

#[derive(Debug, Error)]
pub enum JwtSecretError {
    #[error("SUPABASE_JWT_SECRET must be at least {required} bytes, but {actual} bytes were provided")]
    TooShort { actual: usize, required: usize },
    #[error(
        "SUPABASE_JWT_SECRET must contain sufficient entropy (at least {required} unique bytes); only {actual} unique bytes found"
    )]
    LowEntropy { actual: usize, required: usize },
}

/// Claims carried by an access token issued by the auth platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
    pub aud: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys").finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn from_secret(secret: impl AsRef<[u8]>) -> Result<Self, JwtSecretError> {
        let bytes = secret.as_ref();
        validate_secret(bytes)?;

        Ok(Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        })
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

fn validate_secret(secret: &[u8]) -> Result<(), JwtSecretError> {
    if secret.len() < MIN_JWT_SECRET_LENGTH {
        return Err(JwtSecretError::TooShort {
            actual: secret.len(),
            required: MIN_JWT_SECRET_LENGTH,
        });
    }

    let unique = secret.iter().copied().collect::<HashSet<_>>().len();
    if unique < MIN_UNIQUE_JWT_BYTES {
        return Err(JwtSecretError::LowEntropy {
            actual: unique,
            required: MIN_UNIQUE_JWT_BYTES,
        });
    }

    Ok(())
}

pub fn create_access_token(claims: &AccessClaims, keys: &JwtKeys) -> Result<String, Error> {
    encode(&Header::new(Algorithm::HS256), claims, keys.encoding_key())
}

pub fn decode_access_token(
    token: &str,
    keys: &JwtKeys,
    audience: &str,
) -> Result<TokenData<AccessClaims>, Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);
    validation.validate_exp = true;
    validation.leeway = 0;
    validation.required_spec_claims.insert("exp".to_string());
    validation.required_spec_claims.insert("sub".to_string());
    decode::<AccessClaims>(token, keys.decoding_key(), &validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn valid_secret() -> &'static str {
        "0123456789abcdef0123456789abcdef"
    }

    fn claims(exp_offset: i64) -> AccessClaims {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        AccessClaims {
            sub: "6a1f2c4e-7b0d-4c39-9f41-3a5e8d2b1c07".into(),
            email: Some("user@example.com".into()),
            exp: (now + exp_offset) as usize,
            aud: "authenticated".into(),
            role: Some("authenticated".into()),
        }
    }

    #[test]
    fn rejects_short_secret() {
        let err = JwtKeys::from_secret("too-short").unwrap_err();
        assert!(matches!(
            err,
            JwtSecretError::TooShort {
                actual,
                required: MIN_JWT_SECRET_LENGTH
            } if actual < MIN_JWT_SECRET_LENGTH
        ));
    }

    #[test]
    fn rejects_low_entropy_secret() {
        let err = JwtKeys::from_secret("a".repeat(MIN_JWT_SECRET_LENGTH)).unwrap_err();
        assert!(matches!(err, JwtSecretError::LowEntropy { .. }));
    }

    #[test]
    fn decodes_token_for_expected_audience() {
        let keys = JwtKeys::from_secret(valid_secret()).expect("secret should be accepted");
        let token = create_access_token(&claims(60), &keys).expect("token should encode");

        let decoded =
            decode_access_token(&token, &keys, "authenticated").expect("token should decode");
        assert_eq!(decoded.claims.email.as_deref(), Some("user@example.com"));

        assert!(decode_access_token(&token, &keys, "service_role").is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let keys = JwtKeys::from_secret(valid_secret()).unwrap();
        let token = create_access_token(&claims(-120), &keys).unwrap();
        assert!(decode_access_token(&token, &keys, "authenticated").is_err());
    }
}

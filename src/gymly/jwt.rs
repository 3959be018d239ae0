use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::database::UserRole;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: i32,               // user id
    pub email: String,          // login email at issue time
    pub role: UserRole,         // role at issue time
    pub member_id: Option<i32>, // linked member, if any
    pub iat: i64,               // issued at
    pub exp: i64,               // expiration
}

#[derive(Debug, PartialEq, Eq)]
pub enum TokenError {
    InvalidToken,
    ExpiredToken,
    FailedToGenerate,
}

impl Claims {
    pub fn new(
        user_id: i32,
        email: &str,
        role: UserRole,
        member_id: Option<i32>,
        lifetime: Duration,
    ) -> Self {
        let iat = Utc::now().timestamp();

        Self {
            sub: user_id,
            email: email.to_string(),
            role,
            member_id,
            iat,
            exp: iat + lifetime.as_secs() as i64,
        }
    }
}

/* HS256 keys plus the configured token lifetime. */
pub struct TokenSecrets {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl TokenSecrets {
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }
}

pub fn generate_token(claims: &Claims, secrets: &TokenSecrets) -> Result<String, TokenError> {
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &secrets.encoding)
        .map_err(|_| TokenError::FailedToGenerate)
}

pub fn verify_token(token: &str, secrets: &TokenSecrets) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let claims = match jsonwebtoken::decode::<Claims>(token, &secrets.decoding, &validation) {
        Ok(data) => data.claims,
        Err(e) => {
            return match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(TokenError::ExpiredToken),
                _ => Err(TokenError::InvalidToken),
            };
        }
    };

    if Utc::now().timestamp() > claims.exp {
        return Err(TokenError::ExpiredToken);
    }

    Ok(claims)
}

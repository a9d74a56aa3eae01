/// JWT validation for chat services
///
/// Tokens are issued by the identity service and verified here with the
/// shared RSA public key.
///
/// ## Security Design
///
/// - **RS256 ONLY**: No symmetric algorithms (HS256) to prevent confusion attacks
/// - **No hardcoded keys**: keys are handed in by the owning service at startup
/// - **Immutable**: a validator never changes its key after construction
///
/// ## Usage
///
/// ```ignore
/// use crypto_core::jwt::JwtValidator;
///
/// let public_key = std::fs::read_to_string("jwt_public.pem")?;
/// let validator = JwtValidator::from_rsa_pem(&public_key)?;
/// let claims = validator.validate(token)?;
/// ```
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// JWT algorithm - MUST be RS256
const JWT_ALGORITHM: Algorithm = Algorithm::RS256;

const ACCESS_TOKEN_TYPE: &str = "access";

// ============================================================================
// Data Structures
// ============================================================================

/// JWT Claims structure - standard claims plus profile fields
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Token type: "access" or "refresh"
    pub token_type: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
}

impl Claims {
    /// Parses the subject as a user id.
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::InvalidSubject(self.sub.clone()))
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid RSA key: {0}")]
    InvalidKey(String),

    #[error("token validation failed: {0}")]
    Invalid(String),

    #[error("token is not an access token (got {0})")]
    WrongTokenType(String),

    #[error("invalid user id in token subject: {0}")]
    InvalidSubject(String),

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

// ============================================================================
// Validation
// ============================================================================

/// Verifies access tokens against a public key.
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("algorithm", &JWT_ALGORITHM)
            .finish()
    }
}

impl JwtValidator {
    pub fn from_rsa_pem(public_key_pem: &str) -> Result<Self, JwtError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;

        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;

        Ok(Self {
            decoding_key,
            validation,
        })
    }

    /// Validates signature, expiry and token type.
    ///
    /// Refresh tokens are rejected: only access tokens open sessions.
    pub fn validate(&self, token: &str) -> Result<Claims, JwtError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| JwtError::Invalid(e.to_string()))?;

        if data.claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(JwtError::WrongTokenType(data.claims.token_type));
        }

        Ok(data.claims)
    }

    /// Validates the token and returns its subject as a user id.
    pub fn user_id(&self, token: &str) -> Result<Uuid, JwtError> {
        self.validate(token)?.user_id()
    }
}

// ============================================================================
// Issuance
// ============================================================================

/// Signs access tokens. Only the identity service and test tooling hold the
/// private key.
pub struct JwtIssuer {
    encoding_key: EncodingKey,
}

impl JwtIssuer {
    pub fn from_rsa_pem(private_key_pem: &str) -> Result<Self, JwtError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
        Ok(Self { encoding_key })
    }

    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        username: &str,
        ttl: Duration,
    ) -> Result<String, JwtError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            email: String::new(),
            username: username.to_string(),
        };
        self.sign(&claims)
    }

    /// Signs arbitrary claims; used to build refresh or malformed tokens in tests.
    pub fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        encode(&Header::new(JWT_ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }
}

// ============================================================================
// Header parsing
// ============================================================================

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

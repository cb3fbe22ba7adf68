use std::{
    collections::HashSet,
    fmt::{Debug, Formatter},
};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use crate::{
    JwtConfig,
    service::{Claims, TokenVerificationError, TokenVerifier, error::InvalidConfiguration},
};

const RSA_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];
const EC_ALGORITHMS: [Algorithm; 2] = [Algorithm::ES256, Algorithm::ES384];
const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Verifies signed tokens against a PEM public key or an HMAC secret.
///
/// The accepted algorithms follow from the key type. `exp` and `nbf` are
/// validated when present, the audience is not.
pub struct KeyFileVerifier {
    key: DecodingKey,
    validation: Validation,
    expected_claims: Claims,
}

impl KeyFileVerifier {
    /// `None` if neither `key_file` nor `key_secret` is configured.
    pub fn from_config(config: &JwtConfig) -> Result<Option<Self>, InvalidConfiguration> {
        let expected_claims = parse_expected_claims(&config.expect_claims)?;

        let (key, algorithms) = if let Some(path) = &config.key_file {
            let pem = std::fs::read(path).map_err(|e| {
                InvalidConfiguration::new(
                    "jwt.key_file",
                    format!("Failed to read `{}`: {e}", path.display()),
                )
            })?;
            decoding_key_from_pem(&pem)?
        } else if let Some(secret) = config.key_secret.as_deref().filter(|s| !s.is_empty()) {
            (
                DecodingKey::from_secret(secret.as_bytes()),
                HMAC_ALGORITHMS.to_vec(),
            )
        } else {
            return Ok(None);
        };

        Ok(Some(Self::new(key, &algorithms, expected_claims)))
    }

    #[must_use]
    pub fn new(key: DecodingKey, algorithms: &[Algorithm], expected_claims: Claims) -> Self {
        let mut validation = Validation::new(algorithms.first().copied().unwrap_or_default());
        validation.algorithms = algorithms.to_vec();
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        Self {
            key,
            validation,
            expected_claims,
        }
    }

    fn check_expected_claims(&self, claims: &Claims) -> Result<(), TokenVerificationError> {
        for (name, expected) in &self.expected_claims {
            if claims.get(name) != Some(expected) {
                return Err(TokenVerificationError::UnexpectedClaim(name.clone()));
            }
        }
        Ok(())
    }
}

fn parse_expected_claims(raw: &str) -> Result<Claims, InvalidConfiguration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Claims::new());
    }
    serde_json::from_str(raw).map_err(|e| {
        InvalidConfiguration::new(
            "jwt.expect_claims",
            format!("Expected a JSON object: {e}"),
        )
    })
}

fn decoding_key_from_pem(pem: &[u8]) -> Result<(DecodingKey, Vec<Algorithm>), InvalidConfiguration> {
    if let Ok(key) = DecodingKey::from_rsa_pem(pem) {
        return Ok((key, RSA_ALGORITHMS.to_vec()));
    }
    if let Ok(key) = DecodingKey::from_ec_pem(pem) {
        return Ok((key, EC_ALGORITHMS.to_vec()));
    }
    if let Ok(key) = DecodingKey::from_ed_pem(pem) {
        return Ok((key, vec![Algorithm::EdDSA]));
    }
    Err(InvalidConfiguration::new(
        "jwt.key_file",
        "Not a PEM encoded RSA, EC or Ed25519 public key",
    ))
}

impl Debug for KeyFileVerifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFileVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("expected_claims", &self.expected_claims)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenVerifier for KeyFileVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, TokenVerificationError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        self.check_expected_claims(&data.claims)?;
        Ok(data.claims)
    }
}

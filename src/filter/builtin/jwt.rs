//! JWT authentication.
//!
//! Configured from a TOML file (`options.jwt_config_file`):
//!
//! ```toml
//! secret = "..."            # HMAC algorithms
//! # public_key_file = "..." # RSA / EC algorithms, PEM encoded
//! algorithm = "HS256"
//! header = "authorization"
//! prefix = "Bearer "
//! ```
//!
//! Verified claims are stored as a `serde_json::Value` under
//! [`JWT_CLAIMS_ATTR`] for later filters.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use axum::http::StatusCode;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{GatewayError, GatewayResult};
use crate::filter::{Filter, FilterContext, FilterResult};

pub const JWT_CLAIMS_ATTR: &str = "jwt.claims";

#[derive(Debug, Clone, Deserialize)]
struct JwtConfig {
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    public_key_file: Option<String>,
    #[serde(default = "default_algorithm")]
    algorithm: String,
    #[serde(default = "default_header")]
    header: String,
    #[serde(default = "default_prefix")]
    prefix: String,
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_header() -> String {
    "authorization".to_string()
}

fn default_prefix() -> String {
    "Bearer ".to_string()
}

struct Verifier {
    key: DecodingKey,
    validation: Validation,
    header: String,
    prefix: String,
}

#[derive(Default)]
pub struct JwtFilter {
    verifier: Option<Verifier>,
}

impl fmt::Debug for JwtFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtFilter")
            .field("configured", &self.verifier.is_some())
            .finish()
    }
}

fn config_err(path: &str, reason: impl fmt::Display) -> GatewayError {
    GatewayError::Config(format!("jwt config {}: {}", path, reason))
}

impl JwtFilter {
    fn unauthorized(&self, message: impl Into<String>) -> GatewayError {
        GatewayError::filter(self.name(), StatusCode::UNAUTHORIZED, message)
    }
}

#[async_trait]
impl Filter for JwtFilter {
    fn name(&self) -> &str {
        "jwt"
    }

    /// Load the TOML config file at `cfg`.
    fn init(&mut self, cfg: &str) -> GatewayResult<()> {
        let content = std::fs::read_to_string(cfg).map_err(|e| config_err(cfg, e))?;
        let config: JwtConfig = toml::from_str(&content).map_err(|e| config_err(cfg, e))?;

        let algorithm = Algorithm::from_str(&config.algorithm).map_err(|e| config_err(cfg, e))?;
        let key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = config.secret.as_deref().ok_or_else(|| config_err(cfg, "secret is required"))?;
                DecodingKey::from_secret(secret.as_bytes())
            }
            Algorithm::ES256 | Algorithm::ES384 => {
                let pem = read_key(cfg, config.public_key_file.as_deref())?;
                DecodingKey::from_ec_pem(&pem).map_err(|e| config_err(cfg, e))?
            }
            Algorithm::EdDSA => {
                let pem = read_key(cfg, config.public_key_file.as_deref())?;
                DecodingKey::from_ed_pem(&pem).map_err(|e| config_err(cfg, e))?
            }
            _ => {
                let pem = read_key(cfg, config.public_key_file.as_deref())?;
                DecodingKey::from_rsa_pem(&pem).map_err(|e| config_err(cfg, e))?
            }
        };

        self.verifier = Some(Verifier {
            key,
            validation: Validation::new(algorithm),
            header: config.header.to_ascii_lowercase(),
            prefix: config.prefix,
        });
        tracing::info!(path = cfg, algorithm = %config.algorithm, "JWT filter configured");
        Ok(())
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| GatewayError::Config("jwt filter used before init".to_string()))?;

        let token = ctx
            .origin()
            .headers
            .get(verifier.header.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix(verifier.prefix.as_str()))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| self.unauthorized("missing token"))?;

        let data = decode::<serde_json::Value>(token, &verifier.key, &verifier.validation)
            .map_err(|e| self.unauthorized(format!("invalid token: {}", e)))?;
        ctx.set_attr(JWT_CLAIMS_ATTR, data.claims);
        Ok(StatusCode::OK)
    }
}

fn read_key(cfg: &str, path: Option<&str>) -> GatewayResult<Vec<u8>> {
    let path = path.ok_or_else(|| config_err(cfg, "public_key_file is required"))?;
    std::fs::read(path).map_err(|e| config_err(cfg, format!("{}: {}", path, e)))
}

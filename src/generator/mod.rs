// src/generator/mod.rs

//! Assembling and signing software statements.
//!
//! This is the issuer side of registration: a client application builds its
//! statement here, signs it with its RSA key, and publishes the matching public key
//! at `https://{client host}/.well-known/{namespace}/oauth2.pem`.

use crate::error::NilaDcrError;
use crate::jwt::keys::{is_encrypted_pem, parse_encrypted_rsa_private_key, parse_rsa_private_key};
use crate::jwt::{self, JwsAlgorithm, SigningKey};
use crate::statement::SoftwareStatement;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Builds a [`SoftwareStatement`] from its parts.
///
/// `software_id` defaults to a fresh UUID v4 and `iat` to the current time. Extra
/// claims never override the registered fields.
#[derive(Debug, Clone)]
pub struct StatementBuilder {
    client_uri: String,
    software_id: Option<Uuid>,
    client_name: Option<String>,
    redirect_uri: Option<String>,
    issuer: Option<String>,
    issued_at: Option<i64>,
    claims: Map<String, Value>,
}

impl StatementBuilder {
    pub fn new(client_uri: &str) -> Self {
        Self {
            client_uri: client_uri.to_string(),
            software_id: None,
            client_name: None,
            redirect_uri: None,
            issuer: None,
            issued_at: None,
            claims: Map::new(),
        }
    }

    pub fn software_id(mut self, software_id: Uuid) -> Self {
        self.software_id = Some(software_id);
        self
    }

    pub fn client_name(mut self, name: &str) -> Self {
        self.client_name = Some(name.to_string());
        self
    }

    pub fn redirect_uri(mut self, uri: &str) -> Self {
        self.redirect_uri = Some(uri.to_string());
        self
    }

    /// Sets `iss`. Required for the statement to be verified by a registrar.
    pub fn issuer(mut self, issuer: &str) -> Self {
        self.issuer = Some(issuer.to_string());
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.issued_at = Some(timestamp);
        self
    }

    /// Adds an arbitrary claim, e.g. `logo_uri` or `exp`.
    pub fn claim(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.claims.insert(name.to_string(), value.into());
        self
    }

    /// Assembles the claim set and validates it.
    ///
    /// # Errors
    ///
    /// The schema or domain error [`SoftwareStatement::validate`] reports.
    pub fn build(self) -> Result<SoftwareStatement, NilaDcrError> {
        let mut claims = self.claims;
        let software_id = self.software_id.unwrap_or_else(Uuid::new_v4);
        claims.insert("software_id".to_string(), json!(software_id.hyphenated().to_string()));
        claims.insert("client_uri".to_string(), json!(self.client_uri));
        if let Some(name) = self.client_name {
            claims.insert("client_name".to_string(), json!(name));
        }
        if let Some(uri) = self.redirect_uri {
            claims.insert("redirect_uris".to_string(), json!([uri]));
        }
        if let Some(issuer) = self.issuer {
            claims.insert("iss".to_string(), json!(issuer));
        }
        let iat = self.issued_at.unwrap_or_else(|| chrono::Utc::now().timestamp());
        claims.insert("iat".to_string(), json!(iat));

        SoftwareStatement::validate(claims)
    }
}

/// Encodes a statement with `alg=none`. A registrar accepts it only as unverified.
pub fn encode_unsigned(statement: &SoftwareStatement) -> Result<String, NilaDcrError> {
    jwt::encode(&statement.claims, None, JwsAlgorithm::Unsigned, None, None)
}

/// Signs software statements with an RSA private key.
pub struct StatementSigner {
    key: SigningKey,
    kid: String,
    public_key_pem: String,
    public_jwk: Value,
}

impl StatementSigner {
    /// Reads an unencrypted RSA private key (PKCS#8 or PKCS#1 PEM) from disk.
    pub fn from_pem_file(path: &Path) -> Result<Self, NilaDcrError> {
        Self::from_pem_file_with_passphrase(path, || {
            Err(NilaDcrError::InvalidKeyFormat(format!(
                "RSA private key {:?} is encrypted and no passphrase was given",
                path
            )))
        })
    }

    /// Reads an RSA private key from disk, asking `passphrase` only if the key is
    /// an encrypted PKCS#8 PEM.
    pub fn from_pem_file_with_passphrase<F>(path: &Path, passphrase: F) -> Result<Self, NilaDcrError>
    where
        F: FnOnce() -> Result<String, NilaDcrError>,
    {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            NilaDcrError::InvalidKeyFormat(format!(
                "Failed to read RSA private key file from {:?}: {}",
                path, e
            ))
        })?;
        if is_encrypted_pem(&pem) {
            Self::from_encrypted_pem(&pem, &passphrase()?)
        } else {
            Self::from_pem(&pem)
        }
    }

    pub fn from_pem(pem: &str) -> Result<Self, NilaDcrError> {
        Self::from_private_key(&parse_rsa_private_key(pem)?)
    }

    /// Decrypts a PKCS#8 `ENCRYPTED PRIVATE KEY` PEM with `passphrase`.
    pub fn from_encrypted_pem(pem: &str, passphrase: &str) -> Result<Self, NilaDcrError> {
        Self::from_private_key(&parse_encrypted_rsa_private_key(pem, passphrase)?)
    }

    fn from_private_key(private_key: &RsaPrivateKey) -> Result<Self, NilaDcrError> {
        let key = SigningKey::from_rsa_private_key(private_key)?;
        let public_key = private_key.to_public_key();

        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| NilaDcrError::InvalidKeyFormat(format!("Failed to encode public key: {}", e)))?;

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

        // RFC 7638 thumbprint: SHA-256 over the required members in lexicographic order.
        let canonical_jwk = json!({
            "e": e,
            "kty": "RSA",
            "n": n,
        });
        let digest = Sha256::digest(serde_json::to_string(&canonical_jwk)?.as_bytes());
        let kid = URL_SAFE_NO_PAD.encode(digest);

        let public_jwk = json!({
            "kty": "RSA",
            "n": n,
            "e": e,
            "alg": JwsAlgorithm::RS256.as_str(),
            "use": "sig",
            "kid": kid,
        });

        Ok(Self { key, kid, public_key_pem, public_jwk })
    }

    /// The RFC 7638 thumbprint placed in the `kid` header.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The SPKI PEM to serve from the well-known key endpoint.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// The public key as a JWK.
    pub fn public_jwk(&self) -> &Value {
        &self.public_jwk
    }

    /// Signs `statement` with RS256.
    pub fn sign(&self, statement: &SoftwareStatement) -> Result<String, NilaDcrError> {
        if statement.iss.is_none() {
            warn!("Signing a statement without 'iss'; registrars will not verify it");
        }
        debug!(kid = %self.kid, software_id = %statement.software_id, "Signing software statement");
        jwt::encode(&statement.claims, Some(&self.key), JwsAlgorithm::RS256, Some(&self.kid), None)
    }
}

// src/jwt/mod.rs

//! Compact JWS encoding and strict verification.
//!
//! [`decode`] checks a token in a fixed order: unsecured opt-in, key presence,
//! structure, algorithm, signature, and only then the temporal claims. A token whose
//! signature was never checked can therefore never be reported as expired.

pub mod algorithm;
pub mod keys;
pub mod validation;

pub use algorithm::{AlgorithmFamily, JwsAlgorithm};
pub use keys::{KeySet, SigningKey, VerifyingKey};
pub use validation::{Validation, UNSECURED_CONFIRMATION};

use crate::error::NilaDcrError;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, Engine};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// URL-safe base64: unpadded output, padding tolerated on input.
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims that may be read before the signature is verified.
const PRE_VERIFICATION_CLAIMS: [&str; 2] = ["iss", "jti"];

/// Encodes and signs `payload` as a compact JWS.
///
/// The header starts from `extra_header`; `typ`, `alg` and `kid` are written over it.
/// `key` may be `None` only for [`JwsAlgorithm::Unsigned`], which yields an empty
/// signature segment.
///
/// # Errors
///
/// Fails with [`NilaDcrError::Encoding`] if the payload cannot be serialized, with
/// [`NilaDcrError::EmptyKey`] or [`NilaDcrError::KeyAlgorithmMismatch`] on unusable key
/// material, and with [`NilaDcrError::Crypto`] if signing itself fails.
pub fn encode<T: Serialize + ?Sized>(
    payload: &T,
    key: Option<&SigningKey>,
    algorithm: JwsAlgorithm,
    key_id: Option<&str>,
    extra_header: Option<&Map<String, Value>>,
) -> Result<String, NilaDcrError> {
    let mut header = extra_header.cloned().unwrap_or_default();
    header.insert("typ".to_string(), Value::from("JWT"));
    header.insert("alg".to_string(), Value::from(algorithm.as_str()));
    if let Some(kid) = key_id {
        header.insert("kid".to_string(), Value::from(kid));
    }

    let signing_input = format!(
        "{}.{}",
        BASE64URL.encode(serde_json::to_vec(&header)?),
        BASE64URL.encode(serde_json::to_vec(payload)?)
    );

    let signature = match algorithm.signing_algorithm() {
        None => String::new(),
        Some(jwt_alg) => {
            let key = key.filter(|k| !k.is_empty()).ok_or(NilaDcrError::EmptyKey)?;
            if key.family() != algorithm.family() {
                return Err(NilaDcrError::KeyAlgorithmMismatch(algorithm.to_string()));
            }
            jsonwebtoken::crypto::sign(signing_input.as_bytes(), &key.encoding_key(), jwt_alg)?
        }
    };

    Ok(format!("{}.{}", signing_input, signature))
}

/// Verifies a compact JWS and returns its payload.
///
/// `keys` may be `None` only when `validation` accepts unsigned tokens.
///
/// # Errors
///
/// Returns the first failing check, in order: unsecured confirmation, empty key,
/// structure, algorithm, key selection, signature, then `nbf`, `iat`, `exp`.
pub fn decode(
    token: &str,
    keys: Option<&KeySet>,
    validation: &Validation,
) -> Result<Map<String, Value>, NilaDcrError> {
    let unsecured = validation.allows_unsecured();
    if unsecured && !validation.unsecured_confirmed() {
        return Err(NilaDcrError::UnsecuredNotConfirmed);
    }

    let keys = keys.filter(|k| !k.is_empty());
    if keys.is_none() && !unsecured {
        return Err(NilaDcrError::EmptyKey);
    }

    let parts = Segments::parse(token)?;

    let alg_name = parts
        .header
        .get("alg")
        .and_then(Value::as_str)
        .filter(|alg| !alg.is_empty())
        .ok_or(NilaDcrError::EmptyAlgorithm)?;

    if alg_name != JwsAlgorithm::Unsigned.as_str() || !unsecured {
        let algorithm: JwsAlgorithm = alg_name.parse()?;
        if !validation.algorithms.contains(&algorithm) {
            return Err(NilaDcrError::DisallowedAlgorithm(alg_name.to_string()));
        }
        let key = keys
            .ok_or(NilaDcrError::EmptyKey)?
            .select(parts.header.get("kid").and_then(Value::as_str))?;
        verify_signature(&parts, key, algorithm)?;
    } else {
        debug!("Accepting unsigned token in confirmed unsecured mode");
    }

    check_temporal_claims(&parts.payload, validation)?;

    Ok(parts.payload)
}

/// Reads `iss` or `jti` from a token without verifying it.
///
/// This is how a verifier learns which issuer's key to fetch before it can verify.
///
/// # Errors
///
/// Any other claim name fails with [`NilaDcrError::UnsupportedClaim`]; a malformed
/// token fails with the same format errors as [`decode`].
pub fn get_claim(token: &str, claim: &str) -> Result<Option<Value>, NilaDcrError> {
    if !PRE_VERIFICATION_CLAIMS.contains(&claim) {
        return Err(NilaDcrError::UnsupportedClaim(claim.to_string()));
    }
    let mut parts = Segments::parse(token)?;
    Ok(parts.payload.remove(claim))
}

/// A structurally valid token: both JSON segments decoded, signature base64 checked.
struct Segments<'a> {
    header: Map<String, Value>,
    payload: Map<String, Value>,
    signing_input: &'a str,
    signature: &'a str,
}

impl<'a> Segments<'a> {
    fn parse(token: &'a str) -> Result<Self, NilaDcrError> {
        let pieces: Vec<&str> = token.split('.').collect();
        let [header_b64, payload_b64, signature] = pieces[..] else {
            return Err(NilaDcrError::WrongSegmentCount(pieces.len()));
        };

        let header = decode_json_segment(header_b64).map_err(NilaDcrError::InvalidHeader)?;
        let payload = decode_json_segment(payload_b64).map_err(NilaDcrError::InvalidPayload)?;
        BASE64URL
            .decode(signature)
            .map_err(|e| NilaDcrError::InvalidSignatureEncoding(e.to_string()))?;

        Ok(Self {
            header,
            payload,
            signing_input: &token[..header_b64.len() + 1 + payload_b64.len()],
            signature,
        })
    }
}

fn decode_json_segment(segment: &str) -> Result<Map<String, Value>, String> {
    let bytes = BASE64URL.decode(segment).map_err(|e| e.to_string())?;
    match serde_json::from_slice(&bytes).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(map),
        _ => Err("segment is not a JSON object".to_string()),
    }
}

fn verify_signature(
    parts: &Segments<'_>,
    key: &VerifyingKey,
    algorithm: JwsAlgorithm,
) -> Result<(), NilaDcrError> {
    let jwt_alg = algorithm
        .signing_algorithm()
        .ok_or_else(|| NilaDcrError::KeyAlgorithmMismatch(algorithm.to_string()))?;
    if key.family() != algorithm.family() {
        return Err(NilaDcrError::KeyAlgorithmMismatch(algorithm.to_string()));
    }

    // jsonwebtoken expects the unpadded form.
    let signature = parts.signature.trim_end_matches('=');
    let valid = jsonwebtoken::crypto::verify(
        signature,
        parts.signing_input.as_bytes(),
        &key.decoding_key(),
        jwt_alg,
    )?;
    if valid {
        Ok(())
    } else {
        Err(NilaDcrError::InvalidSignature)
    }
}

fn check_temporal_claims(
    payload: &Map<String, Value>,
    validation: &Validation,
) -> Result<(), NilaDcrError> {
    let now = validation.current_time();
    let leeway = validation.leeway_secs();
    let latest_acceptable = now.saturating_add(leeway);

    let not_before = numeric_claim(payload, "nbf").and_then(|nbf| match nbf {
        Some(nbf) if nbf > latest_acceptable => {
            Err(NilaDcrError::BeforeValid { claim: "nbf", timestamp: nbf })
        }
        _ => Ok(()),
    });
    let issued_at = numeric_claim(payload, "iat").and_then(|iat| match iat {
        Some(iat) if iat > latest_acceptable => {
            Err(NilaDcrError::BeforeValid { claim: "iat", timestamp: iat })
        }
        _ => Ok(()),
    });
    let expiry = numeric_claim(payload, "exp").and_then(|exp| match exp {
        Some(exp) if now.saturating_sub(leeway) >= exp => Err(NilaDcrError::Expired(exp)),
        _ => Ok(()),
    });

    // All three are evaluated; the first failure in nbf, iat, exp order wins.
    not_before.and(issued_at).and(expiry)
}

fn numeric_claim(payload: &Map<String, Value>, name: &str) -> Result<Option<i64>, NilaDcrError> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| NilaDcrError::InvalidPayload(format!("'{}' is out of range", name))),
        Some(_) => Err(NilaDcrError::InvalidPayload(format!(
            "'{}' must be a numeric date",
            name
        ))),
    }
}

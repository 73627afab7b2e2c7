// src/jwt/algorithm.rs

use crate::error::NilaDcrError;
use std::fmt;
use std::str::FromStr;

/// The JWS algorithms this engine implements.
///
/// `Unsigned` is the `none` algorithm. It is structurally supported but can only be
/// accepted through [`Validation::unsecured`](super::Validation::unsecured).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JwsAlgorithm {
    Unsigned,
    HS256,
    HS384,
    HS512,
    RS256,
    RS384,
    RS512,
}

/// Groups algorithms by the kind of key they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFamily {
    Unsigned,
    Hmac,
    Rsa,
}

impl JwsAlgorithm {
    /// Every algorithm the engine can verify, `none` included.
    pub const SUPPORTED: [JwsAlgorithm; 7] = [
        JwsAlgorithm::Unsigned,
        JwsAlgorithm::HS256,
        JwsAlgorithm::HS384,
        JwsAlgorithm::HS512,
        JwsAlgorithm::RS256,
        JwsAlgorithm::RS384,
        JwsAlgorithm::RS512,
    ];

    /// The asymmetric algorithms accepted for verified software statements.
    pub const ASYMMETRIC: [JwsAlgorithm; 3] =
        [JwsAlgorithm::RS256, JwsAlgorithm::RS384, JwsAlgorithm::RS512];

    pub fn as_str(self) -> &'static str {
        match self {
            JwsAlgorithm::Unsigned => "none",
            JwsAlgorithm::HS256 => "HS256",
            JwsAlgorithm::HS384 => "HS384",
            JwsAlgorithm::HS512 => "HS512",
            JwsAlgorithm::RS256 => "RS256",
            JwsAlgorithm::RS384 => "RS384",
            JwsAlgorithm::RS512 => "RS512",
        }
    }

    pub fn family(self) -> AlgorithmFamily {
        match self {
            JwsAlgorithm::Unsigned => AlgorithmFamily::Unsigned,
            JwsAlgorithm::HS256 | JwsAlgorithm::HS384 | JwsAlgorithm::HS512 => AlgorithmFamily::Hmac,
            JwsAlgorithm::RS256 | JwsAlgorithm::RS384 | JwsAlgorithm::RS512 => AlgorithmFamily::Rsa,
        }
    }

    pub fn is_asymmetric(self) -> bool {
        self.family() == AlgorithmFamily::Rsa
    }

    /// Maps to the `jsonwebtoken` primitive, `None` for the unsigned algorithm.
    pub(crate) fn signing_algorithm(self) -> Option<jsonwebtoken::Algorithm> {
        match self {
            JwsAlgorithm::Unsigned => None,
            JwsAlgorithm::HS256 => Some(jsonwebtoken::Algorithm::HS256),
            JwsAlgorithm::HS384 => Some(jsonwebtoken::Algorithm::HS384),
            JwsAlgorithm::HS512 => Some(jsonwebtoken::Algorithm::HS512),
            JwsAlgorithm::RS256 => Some(jsonwebtoken::Algorithm::RS256),
            JwsAlgorithm::RS384 => Some(jsonwebtoken::Algorithm::RS384),
            JwsAlgorithm::RS512 => Some(jsonwebtoken::Algorithm::RS512),
        }
    }
}

impl FromStr for JwsAlgorithm {
    type Err = NilaDcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JwsAlgorithm::SUPPORTED
            .into_iter()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| NilaDcrError::UnsupportedAlgorithm(s.to_string()))
    }
}

impl fmt::Display for JwsAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// src/jwt/validation.rs

use super::algorithm::JwsAlgorithm;
use std::time::Duration;

/// The value a caller must pass to opt in to unsigned (`alg=none`) tokens.
///
/// Allowing `none` is not enough on its own; the confirmation has to match this exactly.
pub const UNSECURED_CONFIRMATION: &str = "i-understand-unsecured-tokens-are-not-verified";

/// Parameters for [`decode`](super::decode).
///
/// Everything that influences validation is carried here rather than in global state,
/// so tests can pin the clock and leeway per call.
#[derive(Debug, Clone)]
pub struct Validation {
    /// Algorithms the caller accepts. Containing `Unsigned` turns on unsecured mode.
    pub algorithms: Vec<JwsAlgorithm>,
    /// Must equal [`UNSECURED_CONFIRMATION`] when unsecured mode is on.
    pub unsecured_confirmation: Option<String>,
    /// Clock skew tolerance applied to `nbf`, `iat` and `exp`.
    pub leeway: Duration,
    /// Fixed current time in seconds since the epoch. `None` reads the system clock.
    pub now: Option<i64>,
}

impl Validation {
    pub fn new(algorithms: &[JwsAlgorithm]) -> Self {
        Self {
            algorithms: algorithms.to_vec(),
            unsecured_confirmation: None,
            leeway: Duration::ZERO,
            now: None,
        }
    }

    /// Accepts only unsigned tokens, with the confirmation already in place.
    pub fn unsecured() -> Self {
        Self::new(&[JwsAlgorithm::Unsigned]).confirm_unsecured(UNSECURED_CONFIRMATION)
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn at(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    pub fn confirm_unsecured(mut self, confirmation: &str) -> Self {
        self.unsecured_confirmation = Some(confirmation.to_string());
        self
    }

    pub(crate) fn allows_unsecured(&self) -> bool {
        self.algorithms.contains(&JwsAlgorithm::Unsigned)
    }

    pub(crate) fn unsecured_confirmed(&self) -> bool {
        self.unsecured_confirmation.as_deref() == Some(UNSECURED_CONFIRMATION)
    }

    pub(crate) fn current_time(&self) -> i64 {
        self.now.unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    pub(crate) fn leeway_secs(&self) -> i64 {
        i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX)
    }
}

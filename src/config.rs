// src/config.rs

use crate::error::NilaDcrError;
use crate::jwt::JwsAlgorithm;
use std::time::Duration;

/// Contains the validation settings for signed software statements.
#[derive(Clone, Debug)]
pub struct ValidationDetails {
    /// The signing algorithms accepted for verified statements.
    /// Only asymmetric algorithms are allowed here, since the key comes from the issuer.
    pub algorithms: Vec<JwsAlgorithm>,
    /// The tolerance for clock skew when validating `nbf`, `iat` and `exp`.
    /// Defaults to 60 seconds.
    pub leeway: Duration,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            algorithms: JwsAlgorithm::ASYMMETRIC.to_vec(),
            leeway: Duration::from_secs(60),
        }
    }
}

/// The main configuration for the registrar.
///
/// It should be constructed using the `ConfigBuilder`.
#[derive(Clone, Debug)]
pub struct Config {
    /// The `{namespace}` in `https://{host}/.well-known/{namespace}/oauth2.pem`.
    pub well_known_namespace: String,
    /// How long a fetched key body (or an empty result) stays cached per host.
    pub key_cache_ttl: Duration,
    /// Upper bound on the number of hosts kept in the key cache.
    pub key_cache_capacity: u64,
    /// Deadline for one well-known key fetch.
    pub fetch_timeout: Duration,
    /// Deadline for one call into the client registry.
    pub registry_timeout: Duration,
    /// The specific validation parameters to apply to statements.
    pub validation: ValidationDetails,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            well_known_namespace: "nila".to_string(),
            key_cache_ttl: Duration::from_secs(5 * 60),
            key_cache_capacity: 1000,
            fetch_timeout: Duration::from_secs(10),
            registry_timeout: Duration::from_secs(5),
            validation: ValidationDetails::default(),
        }
    }
}

/// A builder for creating a `Config` instance.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder` with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the well-known path namespace. Defaults to `nila`.
    pub fn well_known_namespace(mut self, namespace: &str) -> Self {
        self.config.well_known_namespace = namespace.to_string();
        self
    }

    /// Sets the key cache TTL. Defaults to 5 minutes.
    pub fn key_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.key_cache_ttl = ttl;
        self
    }

    pub fn key_cache_capacity(mut self, capacity: u64) -> Self {
        self.config.key_cache_capacity = capacity;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn registry_timeout(mut self, timeout: Duration) -> Self {
        self.config.registry_timeout = timeout;
        self
    }

    /// Sets the accepted signing algorithms.
    /// Defaults to `[RS256, RS384, RS512]`.
    pub fn algorithms(mut self, algorithms: Vec<JwsAlgorithm>) -> Self {
        self.config.validation.algorithms = algorithms;
        self
    }

    /// Sets the clock skew tolerance. Defaults to 60 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.config.validation.leeway = leeway;
        self
    }

    /// Consumes the builder and returns a `Config` object.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is empty or contains `/`, if the TTL or a
    /// timeout is zero, or if the algorithm list is empty or holds a non-asymmetric
    /// algorithm.
    pub fn build(self) -> Result<Config, NilaDcrError> {
        let config = self.config;

        let namespace = config.well_known_namespace.as_str();
        if namespace.is_empty() {
            return Err(NilaDcrError::MissingConfiguration("well_known_namespace".to_string()));
        }
        if namespace.contains('/') {
            return Err(NilaDcrError::InvalidConfiguration(format!(
                "well_known_namespace may not contain '/': {}",
                namespace
            )));
        }
        for (name, value) in [
            ("key_cache_ttl", config.key_cache_ttl),
            ("fetch_timeout", config.fetch_timeout),
            ("registry_timeout", config.registry_timeout),
        ] {
            if value.is_zero() {
                return Err(NilaDcrError::InvalidConfiguration(format!("{} must be positive", name)));
            }
        }
        if config.validation.algorithms.is_empty() {
            return Err(NilaDcrError::MissingConfiguration("validation.algorithms".to_string()));
        }
        if let Some(alg) = config.validation.algorithms.iter().find(|alg| !alg.is_asymmetric()) {
            return Err(NilaDcrError::InvalidConfiguration(format!(
                "{} cannot verify software statements; use an asymmetric algorithm",
                alg
            )));
        }

        Ok(config)
    }
}

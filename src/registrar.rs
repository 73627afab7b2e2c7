// src/registrar.rs

use crate::client::KeyResolver;
use crate::config::Config;
use crate::dynamic::{DynamicClient, RegisteredClient};
use crate::error::NilaDcrError;
use crate::registry::{ClientRegistry, ClientRecord};
use std::sync::Arc;

/// Entry point for dynamic client registration.
///
/// Owns the configuration, the process-wide key resolver and the client registry.
/// It is cheap to clone and intended to be shared across requests.
#[derive(Clone)]
pub struct Registrar {
    config: Config,
    resolver: KeyResolver,
    registry: Arc<dyn ClientRegistry>,
}

impl Registrar {
    /// Creates a registrar that fetches issuer keys over HTTPS.
    pub fn new(config: Config, registry: Arc<dyn ClientRegistry>) -> Self {
        let resolver = KeyResolver::new(&config);
        Self { config, resolver, registry }
    }

    /// Creates a registrar around an existing resolver.
    pub fn with_resolver(config: Config, resolver: KeyResolver, registry: Arc<dyn ClientRegistry>) -> Self {
        Self { config, resolver, registry }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    pub fn registry(&self) -> Arc<dyn ClientRegistry> {
        self.registry.clone()
    }

    /// Builds a [`DynamicClient`] from a compact software statement.
    pub async fn register(&self, token: &str) -> Result<DynamicClient, NilaDcrError> {
        DynamicClient::from_token(token, self).await
    }

    /// Wraps a persisted record so it can be used through the client capability trait.
    pub fn registered(&self, record: ClientRecord) -> RegisteredClient {
        RegisteredClient::new(record, self.registry.clone(), self.config.registry_timeout)
    }
}

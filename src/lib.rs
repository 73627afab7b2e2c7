// src/lib.rs

pub mod client;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod generator;
pub mod jwt;
pub mod registrar;
pub mod registry;
pub mod statement;

/// The public prelude for the `nila-dcr` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::client::{HttpKeyFetcher, KeyCache, KeyFetcher, KeyResolver, MokaKeyCache};
    pub use crate::config::{Config, ConfigBuilder};
    pub use crate::dynamic::{DynamicClient, OAuthClient, RegisteredClient};
    pub use crate::error::{ErrorKind, NilaDcrError};
    pub use crate::generator::{StatementBuilder, StatementSigner};
    pub use crate::jwt::{JwsAlgorithm, KeySet, SigningKey, Validation, VerifyingKey};
    pub use crate::registrar::Registrar;
    pub use crate::registry::{ClientRecord, ClientRegistry, ClientType, MemoryRegistry, Principal, RegistryError};
    pub use crate::statement::SoftwareStatement;
}

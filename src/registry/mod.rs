// src/registry/mod.rs

//! The boundary to durable client storage.
//!
//! The authorization server owns persistence; this crate only talks to it through
//! [`ClientRegistry`]. [`MemoryRegistry`] is a complete in-process implementation.

mod memory;
pub mod redirect;

pub use memory::MemoryRegistry;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a registry implementation. Passed through to callers untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation not permitted: {0}")]
    NotPermitted(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// OAuth client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Public,
    Confidential,
}

impl ClientType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientType::Public => "public",
            ClientType::Confidential => "confidential",
        }
    }
}

/// A persisted client as the registry hands it out.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub client_type: ClientType,
    /// Empty for public clients.
    pub secret: String,
    pub redirect_uris: Vec<String>,
    pub software_id: Option<Uuid>,
}

/// The data needed to create a persisted client.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClient {
    pub name: String,
    pub description: String,
    pub redirect_uri: String,
    pub client_type: ClientType,
}

/// Fields an administrator may change on a persisted client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
}

/// The user on whose behalf a code or token is issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub id: String,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Whether [`ClientRegistry::find_or_create`] inserted a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    Created,
    Existing,
}

/// Persisted client storage and the stateful operations on it.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    async fn find_by_software_id(&self, software_id: &Uuid) -> Result<Option<ClientRecord>, RegistryError>;

    async fn create(&self, client: NewClient) -> Result<ClientRecord, RegistryError>;

    /// Returns the client tagged with `software_id`, creating and tagging it if absent.
    ///
    /// Must be atomic: concurrent calls for one software ID yield a single record.
    async fn find_or_create(
        &self,
        software_id: &Uuid,
        client: NewClient,
    ) -> Result<(ClientRecord, Materialized), RegistryError>;

    async fn tag_with_software_id(&self, client: &ClientRecord, software_id: &Uuid) -> Result<(), RegistryError>;

    /// Stores the raw statement for audit. Best effort.
    async fn record_statement(&self, client: &ClientRecord, statement: &str) -> Result<(), RegistryError>;

    async fn update_client(&self, client: &ClientRecord, update: &ClientUpdate) -> Result<ClientRecord, RegistryError>;

    async fn delete_client(&self, client: &ClientRecord) -> Result<bool, RegistryError>;

    async fn approve(&self, client: &ClientRecord) -> Result<(), RegistryError>;

    async fn is_approved(&self, client: &ClientRecord) -> Result<bool, RegistryError>;

    async fn generate_authorization_code(
        &self,
        client: &ClientRecord,
        principal: &Principal,
    ) -> Result<String, RegistryError>;

    async fn issue_token(
        &self,
        client: &ClientRecord,
        principal: &Principal,
        metadata: Map<String, Value>,
    ) -> Result<String, RegistryError>;

    async fn regenerate_secret(&self, client: &ClientRecord) -> Result<String, RegistryError>;

    /// Whether the acting principal may approve `client` without review.
    async fn current_principal_is_privileged(&self, client: &ClientRecord) -> bool;
}

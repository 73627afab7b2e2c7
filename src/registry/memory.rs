// src/registry/memory.rs

use super::{
    ClientRecord, ClientRegistry, ClientType, ClientUpdate, Materialized, NewClient, Principal,
    RegistryError,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

struct StoredClient {
    record: ClientRecord,
    approved: bool,
    statement: Option<String>,
}

struct IssuedToken {
    client_id: String,
    principal: Principal,
    metadata: Map<String, Value>,
}

#[derive(Default)]
struct State {
    clients: HashMap<String, StoredClient>,
    by_software_id: HashMap<Uuid, String>,
    codes: HashMap<String, IssuedToken>,
    tokens: HashMap<String, IssuedToken>,
}

impl State {
    fn insert(&mut self, client: NewClient) -> ClientRecord {
        let secret = match client.client_type {
            ClientType::Public => String::new(),
            ClientType::Confidential => Uuid::new_v4().simple().to_string(),
        };
        let record = ClientRecord {
            id: Uuid::new_v4().simple().to_string(),
            name: client.name,
            description: client.description,
            client_type: client.client_type,
            secret,
            redirect_uris: vec![client.redirect_uri],
            software_id: None,
        };
        self.clients.insert(
            record.id.clone(),
            StoredClient { record: record.clone(), approved: false, statement: None },
        );
        record
    }

    fn tag(&mut self, client_id: &str, software_id: &Uuid) -> Result<ClientRecord, RegistryError> {
        if let Some(owner) = self.by_software_id.get(software_id) {
            if owner != client_id {
                return Err(RegistryError::Conflict(format!(
                    "software_id {} already belongs to client {}",
                    software_id, owner
                )));
            }
        }
        let stored = self.stored_mut(client_id)?;
        stored.record.software_id = Some(*software_id);
        let record = stored.record.clone();
        self.by_software_id.insert(*software_id, client_id.to_string());
        Ok(record)
    }

    fn stored(&self, client_id: &str) -> Result<&StoredClient, RegistryError> {
        self.clients
            .get(client_id)
            .ok_or_else(|| RegistryError::ClientNotFound(client_id.to_string()))
    }

    fn stored_mut(&mut self, client_id: &str) -> Result<&mut StoredClient, RegistryError> {
        self.clients
            .get_mut(client_id)
            .ok_or_else(|| RegistryError::ClientNotFound(client_id.to_string()))
    }

    fn approved(&self, client_id: &str) -> Result<&StoredClient, RegistryError> {
        let stored = self.stored(client_id)?;
        if !stored.approved {
            return Err(RegistryError::NotPermitted(format!("client {} is pending approval", client_id)));
        }
        Ok(stored)
    }
}

/// In-memory [`ClientRegistry`].
///
/// A single `RwLock` guards every map, so `find_or_create` is atomic.
/// Suitable for tests, demos and single-process deployments.
pub struct MemoryRegistry {
    state: RwLock<State>,
    privileged: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            privileged: AtomicBool::new(false),
        }
    }

    /// Sets whether the acting principal may auto-approve new clients.
    pub fn with_privileged_principal(self, privileged: bool) -> Self {
        self.set_privileged(privileged);
        self
    }

    pub fn set_privileged(&self, privileged: bool) {
        self.privileged.store(privileged, Ordering::SeqCst);
    }

    /// Number of persisted clients.
    pub async fn len(&self) -> usize {
        self.state.read().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The audit copy of the statement a client was created from.
    pub async fn statement_for(&self, client_id: &str) -> Option<String> {
        let state = self.state.read().await;
        state.clients.get(client_id).and_then(|stored| stored.statement.clone())
    }

    /// The principal an authorization code was issued to, if the code exists.
    pub async fn code_principal(&self, code: &str) -> Option<Principal> {
        let state = self.state.read().await;
        state.codes.get(code).map(|issued| issued.principal.clone())
    }

    /// The client an access token was issued to, if the token exists.
    pub async fn token_client(&self, token: &str) -> Option<String> {
        let state = self.state.read().await;
        state.tokens.get(token).map(|issued| issued.client_id.clone())
    }

    /// The metadata an access token was issued with.
    pub async fn token_metadata(&self, token: &str) -> Option<Map<String, Value>> {
        let state = self.state.read().await;
        state.tokens.get(token).map(|issued| issued.metadata.clone())
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientRegistry for MemoryRegistry {
    async fn find_by_software_id(&self, software_id: &Uuid) -> Result<Option<ClientRecord>, RegistryError> {
        let state = self.state.read().await;
        Ok(state
            .by_software_id
            .get(software_id)
            .and_then(|id| state.clients.get(id))
            .map(|stored| stored.record.clone()))
    }

    async fn create(&self, client: NewClient) -> Result<ClientRecord, RegistryError> {
        let mut state = self.state.write().await;
        Ok(state.insert(client))
    }

    async fn find_or_create(
        &self,
        software_id: &Uuid,
        client: NewClient,
    ) -> Result<(ClientRecord, Materialized), RegistryError> {
        let mut state = self.state.write().await;
        if let Some(stored) = state.by_software_id.get(software_id).and_then(|id| state.clients.get(id)) {
            return Ok((stored.record.clone(), Materialized::Existing));
        }
        let created = state.insert(client);
        let record = state.tag(&created.id, software_id)?;
        debug!(client_id = %record.id, %software_id, "Created client for software statement");
        Ok((record, Materialized::Created))
    }

    async fn tag_with_software_id(&self, client: &ClientRecord, software_id: &Uuid) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        state.tag(&client.id, software_id).map(|_| ())
    }

    async fn record_statement(&self, client: &ClientRecord, statement: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        state.stored_mut(&client.id)?.statement = Some(statement.to_string());
        Ok(())
    }

    async fn update_client(&self, client: &ClientRecord, update: &ClientUpdate) -> Result<ClientRecord, RegistryError> {
        if matches!(&update.redirect_uris, Some(uris) if uris.is_empty()) {
            return Err(RegistryError::Conflict("a client needs at least one redirect URI".to_string()));
        }
        let mut state = self.state.write().await;
        let stored = state.stored_mut(&client.id)?;
        if let Some(name) = &update.name {
            stored.record.name = name.clone();
        }
        if let Some(description) = &update.description {
            stored.record.description = description.clone();
        }
        if let Some(redirect_uris) = &update.redirect_uris {
            stored.record.redirect_uris = redirect_uris.clone();
        }
        Ok(stored.record.clone())
    }

    async fn delete_client(&self, client: &ClientRecord) -> Result<bool, RegistryError> {
        let mut state = self.state.write().await;
        let Some(stored) = state.clients.remove(&client.id) else {
            return Ok(false);
        };
        if let Some(software_id) = stored.record.software_id {
            state.by_software_id.remove(&software_id);
        }
        state.codes.retain(|_, issued| issued.client_id != client.id);
        state.tokens.retain(|_, issued| issued.client_id != client.id);
        Ok(true)
    }

    async fn approve(&self, client: &ClientRecord) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        state.stored_mut(&client.id)?.approved = true;
        Ok(())
    }

    async fn is_approved(&self, client: &ClientRecord) -> Result<bool, RegistryError> {
        let state = self.state.read().await;
        Ok(state.stored(&client.id)?.approved)
    }

    async fn generate_authorization_code(
        &self,
        client: &ClientRecord,
        principal: &Principal,
    ) -> Result<String, RegistryError> {
        let mut state = self.state.write().await;
        state.approved(&client.id)?;
        let code = Uuid::new_v4().simple().to_string();
        state.codes.insert(
            code.clone(),
            IssuedToken { client_id: client.id.clone(), principal: principal.clone(), metadata: Map::new() },
        );
        Ok(code)
    }

    async fn issue_token(
        &self,
        client: &ClientRecord,
        principal: &Principal,
        metadata: Map<String, Value>,
    ) -> Result<String, RegistryError> {
        let mut state = self.state.write().await;
        state.approved(&client.id)?;
        let token = Uuid::new_v4().simple().to_string();
        state.tokens.insert(
            token.clone(),
            IssuedToken { client_id: client.id.clone(), principal: principal.clone(), metadata },
        );
        Ok(token)
    }

    async fn regenerate_secret(&self, client: &ClientRecord) -> Result<String, RegistryError> {
        let mut state = self.state.write().await;
        let stored = state.stored_mut(&client.id)?;
        if stored.record.client_type == ClientType::Public {
            return Err(RegistryError::NotPermitted("public clients have no secret".to_string()));
        }
        stored.record.secret = Uuid::new_v4().simple().to_string();
        Ok(stored.record.secret.clone())
    }

    async fn current_principal_is_privileged(&self, _client: &ClientRecord) -> bool {
        self.privileged.load(Ordering::SeqCst)
    }
}

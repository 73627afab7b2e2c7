// src/dynamic.rs

//! Client capability surface shared by persisted and statement-backed clients.

use crate::error::NilaDcrError;
use crate::jwt::{self, KeySet, Validation};
use crate::registrar::Registrar;
use crate::registry::redirect::redirect_uri_allowed;
use crate::registry::{
    ClientRecord, ClientRegistry, ClientType, ClientUpdate, Materialized, NewClient, Principal,
    RegistryError,
};
use crate::statement::SoftwareStatement;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// The operations every OAuth client supports, persisted or not.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    fn id(&self) -> String;
    fn name(&self) -> String;
    fn description(&self) -> String;
    fn client_type(&self) -> ClientType;
    /// Empty for public clients.
    fn secret(&self) -> String;
    fn redirect_uris(&self) -> Vec<String>;

    /// Whether `uri` may be used as the redirect target of an authorization request.
    fn check_redirect_uri(&self, uri: &str) -> bool {
        redirect_uri_allowed(&self.redirect_uris(), uri)
    }

    async fn update(&self, update: &ClientUpdate) -> Result<(), NilaDcrError>;
    async fn delete(&self) -> Result<bool, NilaDcrError>;
    async fn is_approved(&self) -> Result<bool, NilaDcrError>;
    async fn approve(&self) -> Result<(), NilaDcrError>;
    async fn generate_authorization_code(&self, principal: &Principal) -> Result<String, NilaDcrError>;
    async fn issue_token(&self, principal: &Principal, metadata: Map<String, Value>) -> Result<String, NilaDcrError>;
    async fn regenerate_secret(&self) -> Result<String, NilaDcrError>;
}

/// Runs one registry call under a deadline. Registry errors pass through unchanged.
async fn bounded<T, F>(operation: &'static str, after: Duration, call: F) -> Result<T, NilaDcrError>
where
    F: Future<Output = Result<T, RegistryError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result.map_err(NilaDcrError::Registry),
        Err(_) => Err(NilaDcrError::Timeout { operation, after }),
    }
}

/// A persisted client bound to the registry that stores it.
pub struct RegisteredClient {
    record: RwLock<ClientRecord>,
    registry: Arc<dyn ClientRegistry>,
    timeout: Duration,
}

impl RegisteredClient {
    pub fn new(record: ClientRecord, registry: Arc<dyn ClientRegistry>, timeout: Duration) -> Self {
        Self { record: RwLock::new(record), registry, timeout }
    }

    /// A copy of the current record.
    pub fn record(&self) -> ClientRecord {
        self.record.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn with_record<T>(&self, f: impl FnOnce(&ClientRecord) -> T) -> T {
        f(&self.record.read().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl OAuthClient for RegisteredClient {
    fn id(&self) -> String {
        self.with_record(|r| r.id.clone())
    }

    fn name(&self) -> String {
        self.with_record(|r| r.name.clone())
    }

    fn description(&self) -> String {
        self.with_record(|r| r.description.clone())
    }

    fn client_type(&self) -> ClientType {
        self.with_record(|r| r.client_type)
    }

    fn secret(&self) -> String {
        self.with_record(|r| r.secret.clone())
    }

    fn redirect_uris(&self) -> Vec<String> {
        self.with_record(|r| r.redirect_uris.clone())
    }

    async fn update(&self, update: &ClientUpdate) -> Result<(), NilaDcrError> {
        let record = self.record();
        let updated = bounded("client update", self.timeout, self.registry.update_client(&record, update)).await?;
        *self.record.write().unwrap_or_else(PoisonError::into_inner) = updated;
        Ok(())
    }

    async fn delete(&self) -> Result<bool, NilaDcrError> {
        bounded("client delete", self.timeout, self.registry.delete_client(&self.record())).await
    }

    async fn is_approved(&self) -> Result<bool, NilaDcrError> {
        bounded("approval lookup", self.timeout, self.registry.is_approved(&self.record())).await
    }

    async fn approve(&self) -> Result<(), NilaDcrError> {
        bounded("client approval", self.timeout, self.registry.approve(&self.record())).await
    }

    async fn generate_authorization_code(&self, principal: &Principal) -> Result<String, NilaDcrError> {
        let record = self.record();
        bounded(
            "authorization code",
            self.timeout,
            self.registry.generate_authorization_code(&record, principal),
        )
        .await
    }

    async fn issue_token(&self, principal: &Principal, metadata: Map<String, Value>) -> Result<String, NilaDcrError> {
        let record = self.record();
        bounded("token issuance", self.timeout, self.registry.issue_token(&record, principal, metadata)).await
    }

    async fn regenerate_secret(&self) -> Result<String, NilaDcrError> {
        let record = self.record();
        let secret = bounded("secret regeneration", self.timeout, self.registry.regenerate_secret(&record)).await?;
        self.record.write().unwrap_or_else(PoisonError::into_inner).secret = secret.clone();
        Ok(secret)
    }
}

/// Where a dynamic client stands with respect to the registry.
#[derive(Debug, Clone)]
enum Persisted {
    /// The registry has not been asked yet.
    Unresolved,
    /// The registry was asked and had no client for this software ID.
    Absent,
    /// Created by this client, but recording or approval did not finish.
    Created(ClientRecord),
    Bound(ClientRecord),
}

/// A client defined entirely by a software statement.
///
/// It owns no storage. Its identity is the statement's `software_id`, which is also
/// the key of its persisted counterpart. Durable operations materialize that
/// counterpart on first use through [`DynamicClient::persist`].
pub struct DynamicClient {
    statement: SoftwareStatement,
    verified: bool,
    raw_token: String,
    registry: Arc<dyn ClientRegistry>,
    registry_timeout: Duration,
    persisted: Mutex<Persisted>,
}

impl DynamicClient {
    /// Builds a dynamic client from a compact software statement.
    ///
    /// With a usable `iss` claim the issuer's published key is resolved and the token
    /// must verify under one of the configured asymmetric algorithms. Without one the
    /// token is decoded as an unsigned statement and the client is marked unverified.
    /// Either way the statement must pass [`SoftwareStatement::validate`].
    ///
    /// # Errors
    ///
    /// The first failure from key resolution, decoding or statement validation.
    #[instrument(skip_all, err)]
    pub async fn from_token(token: &str, registrar: &Registrar) -> Result<Self, NilaDcrError> {
        let config = registrar.config();
        let issuer = jwt::get_claim(token, "iss")?
            .and_then(|iss| iss.as_str().map(str::to_string))
            .filter(|iss| !iss.is_empty());

        let (claims, verified) = match issuer {
            Some(issuer) => {
                debug!(%issuer, "Verifying software statement against issuer key");
                let keys = KeySet::from(registrar.resolver().resolve(&issuer).await?);
                let validation =
                    Validation::new(&config.validation.algorithms).with_leeway(config.validation.leeway);
                (jwt::decode(token, Some(&keys), &validation)?, true)
            }
            None => {
                debug!("Software statement has no issuer. Decoding unverified.");
                let validation = Validation::unsecured().with_leeway(config.validation.leeway);
                (jwt::decode(token, None, &validation)?, false)
            }
        };

        let statement = SoftwareStatement::validate(claims)?;
        info!(software_id = %statement.software_id, verified, "Built dynamic client");

        Ok(Self {
            statement,
            verified,
            raw_token: token.to_string(),
            registry: registrar.registry(),
            registry_timeout: config.registry_timeout,
            persisted: Mutex::new(Persisted::Unresolved),
        })
    }

    pub fn statement(&self) -> &SoftwareStatement {
        &self.statement
    }

    /// Whether the statement's signature was checked against the issuer's key.
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Returns the persisted client for this software ID, creating it if needed.
    ///
    /// An existing client is bound as-is; its name and approval are never touched.
    /// A new client is tagged with the software ID, gets the raw statement recorded
    /// for audit, and is approved only if the acting principal is privileged. If that
    /// follow-up fails, the next call on this client runs it again before binding.
    #[instrument(skip(self), fields(software_id = %self.statement.software_id), err)]
    pub async fn persist(&self) -> Result<ClientRecord, NilaDcrError> {
        let mut persisted = self.persisted.lock().await;

        match persisted.clone() {
            Persisted::Bound(record) => return Ok(record),
            Persisted::Created(record) => {
                debug!(client_id = %record.id, "Retrying follow-up for created client");
                self.on_created(&record).await?;
                *persisted = Persisted::Bound(record.clone());
                return Ok(record);
            }
            Persisted::Unresolved => {
                if let Some(existing) = self.lookup().await? {
                    debug!(client_id = %existing.id, "Bound to existing client");
                    *persisted = Persisted::Bound(existing.clone());
                    return Ok(existing);
                }
            }
            Persisted::Absent => {}
        }

        let new_client = NewClient {
            name: self.statement.client_name.clone(),
            description: self.statement.client_uri.to_string(),
            redirect_uri: self.statement.redirect_uri().to_string(),
            client_type: ClientType::Public,
        };
        let (record, outcome) = bounded(
            "client creation",
            self.registry_timeout,
            self.registry.find_or_create(&self.statement.software_id, new_client),
        )
        .await?;

        if outcome == Materialized::Created {
            *persisted = Persisted::Created(record.clone());
            self.on_created(&record).await?;
        }

        *persisted = Persisted::Bound(record.clone());
        Ok(record)
    }

    async fn on_created(&self, record: &ClientRecord) -> Result<(), NilaDcrError> {
        if let Err(e) = bounded(
            "statement audit",
            self.registry_timeout,
            self.registry.record_statement(record, &self.raw_token),
        )
        .await
        {
            warn!(client_id = %record.id, error = %e, "Failed to record software statement");
        }

        let privileged = tokio::time::timeout(
            self.registry_timeout,
            self.registry.current_principal_is_privileged(record),
        )
        .await
        .map_err(|_| NilaDcrError::Timeout { operation: "privilege check", after: self.registry_timeout })?;

        if privileged {
            bounded("client approval", self.registry_timeout, self.registry.approve(record)).await?;
            info!(client_id = %record.id, "Created and approved client");
        } else {
            info!(client_id = %record.id, "Created client pending approval");
        }
        Ok(())
    }

    async fn lookup(&self) -> Result<Option<ClientRecord>, NilaDcrError> {
        bounded(
            "client lookup",
            self.registry_timeout,
            self.registry.find_by_software_id(&self.statement.software_id),
        )
        .await
    }
}

#[async_trait]
impl OAuthClient for DynamicClient {
    fn id(&self) -> String {
        self.statement.software_id.to_string()
    }

    fn name(&self) -> String {
        self.statement.client_name.clone()
    }

    fn description(&self) -> String {
        format!("unregistered application {}", self.statement.client_name)
    }

    fn client_type(&self) -> ClientType {
        ClientType::Public
    }

    fn secret(&self) -> String {
        String::new()
    }

    fn redirect_uris(&self) -> Vec<String> {
        self.statement.redirect_uris.iter().map(ToString::to_string).collect()
    }

    async fn update(&self, _update: &ClientUpdate) -> Result<(), NilaDcrError> {
        Err(NilaDcrError::DynamicClientImmutable)
    }

    async fn delete(&self) -> Result<bool, NilaDcrError> {
        Ok(false)
    }

    /// Never creates a client. A statement nobody has persisted is never approved.
    async fn is_approved(&self) -> Result<bool, NilaDcrError> {
        let mut persisted = self.persisted.lock().await;
        let record = match persisted.clone() {
            Persisted::Bound(record) | Persisted::Created(record) => record,
            Persisted::Absent => return Ok(false),
            Persisted::Unresolved => match self.lookup().await? {
                Some(record) => {
                    *persisted = Persisted::Bound(record.clone());
                    record
                }
                None => {
                    *persisted = Persisted::Absent;
                    return Ok(false);
                }
            },
        };
        drop(persisted);
        bounded("approval lookup", self.registry_timeout, self.registry.is_approved(&record)).await
    }

    async fn approve(&self) -> Result<(), NilaDcrError> {
        let record = self.persist().await?;
        bounded("client approval", self.registry_timeout, self.registry.approve(&record)).await
    }

    async fn generate_authorization_code(&self, principal: &Principal) -> Result<String, NilaDcrError> {
        let record = self.persist().await?;
        bounded(
            "authorization code",
            self.registry_timeout,
            self.registry.generate_authorization_code(&record, principal),
        )
        .await
    }

    async fn issue_token(&self, principal: &Principal, metadata: Map<String, Value>) -> Result<String, NilaDcrError> {
        let record = self.persist().await?;
        bounded(
            "token issuance",
            self.registry_timeout,
            self.registry.issue_token(&record, principal, metadata),
        )
        .await
    }

    async fn regenerate_secret(&self) -> Result<String, NilaDcrError> {
        let record = self.persist().await?;
        bounded("secret regeneration", self.registry_timeout, self.registry.regenerate_secret(&record)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::error::ErrorKind;
    use crate::jwt::JwsAlgorithm;
    use crate::registry::MemoryRegistry;
    use serde_json::json;

    const SOFTWARE_ID: &str = "0b6f1c1e-6a55-4e7b-8f55-3c1d2e9a7b10";

    fn unsigned(payload: Value) -> String {
        jwt::encode(&payload, None, JwsAlgorithm::Unsigned, None, None).unwrap()
    }

    fn statement() -> Value {
        json!({
            "software_id": SOFTWARE_ID,
            "client_name": "Example App",
            "client_uri": "https://a.example/app",
            "redirect_uris": ["https://a.example/cb"],
        })
    }

    fn registrar(registry: Arc<MemoryRegistry>) -> Registrar {
        Registrar::new(ConfigBuilder::new().build().unwrap(), registry)
    }

    #[tokio::test]
    async fn unsigned_statement_builds_unverified_public_client() {
        let registry = Arc::new(MemoryRegistry::new());
        let client = DynamicClient::from_token(&unsigned(statement()), &registrar(registry)).await.unwrap();

        assert!(!client.is_verified());
        assert_eq!(client.id(), SOFTWARE_ID);
        assert_eq!(client.description(), "unregistered application Example App");
        assert_eq!(client.client_type(), ClientType::Public);
        assert!(client.secret().is_empty());
        assert!(client.check_redirect_uri("https://a.example/cb?state=1"));
        assert!(!client.check_redirect_uri("https://b.example/cb"));
    }

    #[tokio::test]
    async fn invalid_statement_aborts_construction() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut payload = statement();
        payload["redirect_uris"] = json!(["https://b.example/cb"]);
        let err = DynamicClient::from_token(&unsigned(payload), &registrar(registry)).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DomainMismatch);
    }

    #[tokio::test]
    async fn is_approved_has_no_side_effect() {
        let registry = Arc::new(MemoryRegistry::new().with_privileged_principal(true));
        let client = DynamicClient::from_token(&unsigned(statement()), &registrar(registry.clone())).await.unwrap();

        assert!(!client.is_approved().await.unwrap());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_persist_creates_one_client() {
        let registry = Arc::new(MemoryRegistry::new());
        let registrar = registrar(registry.clone());
        let token = unsigned(statement());
        let first = DynamicClient::from_token(&token, &registrar).await.unwrap();
        let second = DynamicClient::from_token(&token, &registrar).await.unwrap();

        let (a, b) = tokio::join!(first.persist(), second.persist());
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn privileged_principal_auto_approves() {
        let registry = Arc::new(MemoryRegistry::new().with_privileged_principal(true));
        let token = unsigned(statement());
        let client = DynamicClient::from_token(&token, &registrar(registry.clone())).await.unwrap();

        let code = client.generate_authorization_code(&Principal::new("alice")).await.unwrap();
        assert!(!code.is_empty());
        assert!(client.is_approved().await.unwrap());

        let record = client.persist().await.unwrap();
        assert_eq!(record.name, "Example App");
        assert_eq!(record.software_id.map(|id| id.to_string()).as_deref(), Some(SOFTWARE_ID));
        assert_eq!(registry.statement_for(&record.id).await.as_deref(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn unprivileged_creation_stays_pending() {
        let registry = Arc::new(MemoryRegistry::new());
        let client = DynamicClient::from_token(&unsigned(statement()), &registrar(registry.clone())).await.unwrap();

        let err = client.generate_authorization_code(&Principal::new("bob")).await.unwrap_err();
        assert!(matches!(err, NilaDcrError::Registry(RegistryError::NotPermitted(_))));
        assert_eq!(registry.len().await, 1);
        assert!(!client.is_approved().await.unwrap());
    }

    #[tokio::test]
    async fn existing_client_is_not_renamed_or_reapproved() {
        let registry = Arc::new(MemoryRegistry::new());
        let registrar = registrar(registry.clone());
        let original = DynamicClient::from_token(&unsigned(statement()), &registrar).await.unwrap();
        let first = original.persist().await.unwrap();

        registry.set_privileged(true);
        let mut renamed = statement();
        renamed["client_name"] = json!("Renamed App");
        let later = DynamicClient::from_token(&unsigned(renamed), &registrar).await.unwrap();
        let bound = later.persist().await.unwrap();

        assert_eq!(bound.id, first.id);
        assert_eq!(bound.name, "Example App");
        assert!(!later.is_approved().await.unwrap());
    }

    #[tokio::test]
    async fn mutating_operations_are_refused() {
        let registry = Arc::new(MemoryRegistry::new());
        let client = DynamicClient::from_token(&unsigned(statement()), &registrar(registry.clone())).await.unwrap();

        let err = client.update(&ClientUpdate::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert!(!client.delete().await.unwrap());
        assert!(matches!(
            client.regenerate_secret().await,
            Err(NilaDcrError::Registry(RegistryError::NotPermitted(_)))
        ));
    }

    #[tokio::test]
    async fn registered_client_tracks_updates() {
        let registry = Arc::new(MemoryRegistry::new());
        let record = registry
            .create(NewClient {
                name: "Admin App".into(),
                description: "managed".into(),
                redirect_uri: "https://c.example/cb".into(),
                client_type: ClientType::Confidential,
            })
            .await
            .unwrap();
        let client = RegisteredClient::new(record, registry.clone(), Duration::from_secs(1));

        client
            .update(&ClientUpdate { redirect_uris: Some(vec!["https://c.example/other".into()]), ..Default::default() })
            .await
            .unwrap();
        assert!(client.check_redirect_uri("https://c.example/other"));
        assert!(!client.check_redirect_uri("https://c.example/cb"));

        let secret = client.regenerate_secret().await.unwrap();
        assert_eq!(client.secret(), secret);
        assert!(client.delete().await.unwrap());
    }

    /// Delegates to a [`MemoryRegistry`] but fails the first `approve` calls.
    struct FlakyApproval {
        inner: MemoryRegistry,
        failures: std::sync::atomic::AtomicUsize,
    }

    impl FlakyApproval {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryRegistry::new().with_privileged_principal(true),
                failures: std::sync::atomic::AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl ClientRegistry for FlakyApproval {
        async fn find_by_software_id(&self, software_id: &uuid::Uuid) -> Result<Option<ClientRecord>, RegistryError> {
            self.inner.find_by_software_id(software_id).await
        }

        async fn create(&self, client: NewClient) -> Result<ClientRecord, RegistryError> {
            self.inner.create(client).await
        }

        async fn find_or_create(
            &self,
            software_id: &uuid::Uuid,
            client: NewClient,
        ) -> Result<(ClientRecord, Materialized), RegistryError> {
            self.inner.find_or_create(software_id, client).await
        }

        async fn tag_with_software_id(&self, client: &ClientRecord, software_id: &uuid::Uuid) -> Result<(), RegistryError> {
            self.inner.tag_with_software_id(client, software_id).await
        }

        async fn record_statement(&self, client: &ClientRecord, statement: &str) -> Result<(), RegistryError> {
            self.inner.record_statement(client, statement).await
        }

        async fn update_client(&self, client: &ClientRecord, update: &ClientUpdate) -> Result<ClientRecord, RegistryError> {
            self.inner.update_client(client, update).await
        }

        async fn delete_client(&self, client: &ClientRecord) -> Result<bool, RegistryError> {
            self.inner.delete_client(client).await
        }

        async fn approve(&self, client: &ClientRecord) -> Result<(), RegistryError> {
            use std::sync::atomic::Ordering;
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(RegistryError::Storage("transient".into()));
            }
            self.inner.approve(client).await
        }

        async fn is_approved(&self, client: &ClientRecord) -> Result<bool, RegistryError> {
            self.inner.is_approved(client).await
        }

        async fn generate_authorization_code(
            &self,
            client: &ClientRecord,
            principal: &Principal,
        ) -> Result<String, RegistryError> {
            self.inner.generate_authorization_code(client, principal).await
        }

        async fn issue_token(
            &self,
            client: &ClientRecord,
            principal: &Principal,
            metadata: Map<String, Value>,
        ) -> Result<String, RegistryError> {
            self.inner.issue_token(client, principal, metadata).await
        }

        async fn regenerate_secret(&self, client: &ClientRecord) -> Result<String, RegistryError> {
            self.inner.regenerate_secret(client).await
        }

        async fn current_principal_is_privileged(&self, client: &ClientRecord) -> bool {
            self.inner.current_principal_is_privileged(client).await
        }
    }

    #[tokio::test]
    async fn failed_auto_approval_is_retried() {
        let registry = Arc::new(FlakyApproval::new(1));
        let registrar = Registrar::new(ConfigBuilder::new().build().unwrap(), registry.clone());
        let client = DynamicClient::from_token(&unsigned(statement()), &registrar).await.unwrap();
        let alice = Principal::new("alice");

        let err = client.generate_authorization_code(&alice).await.unwrap_err();
        assert!(matches!(err, NilaDcrError::Registry(RegistryError::Storage(_))));
        assert!(!client.is_approved().await.unwrap());

        let code = client.generate_authorization_code(&alice).await.unwrap();
        assert!(!code.is_empty());
        assert!(client.is_approved().await.unwrap());
        assert_eq!(registry.inner.len().await, 1);
    }
}

// src/client.rs

use crate::config::Config;
use crate::error::NilaDcrError;
use crate::jwt::VerifyingKey;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

/// Fetches the body of an issuer's well-known key document.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, NilaDcrError>;
}

/// Host-keyed store for raw PEM bodies. An empty string records "no key published".
#[async_trait]
pub trait KeyCache: Send + Sync {
    async fn get(&self, host: &str) -> Option<String>;
    async fn set(&self, host: &str, pem: String, ttl: Duration);
}

/// [`KeyFetcher`] over HTTPS with `reqwest`.
#[derive(Clone, Default)]
pub struct HttpKeyFetcher {
    http_client: reqwest::Client,
}

impl HttpKeyFetcher {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, NilaDcrError> {
        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| NilaDcrError::KeyFetch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NilaDcrError::KeyFetch(format!("{} returned {}", url, status)));
        }
        response.text().await.map_err(|e| NilaDcrError::KeyFetch(e.to_string()))
    }
}

#[derive(Clone)]
struct CachedPem {
    pem: Arc<str>,
    ttl: Duration,
}

struct PemExpiry;

impl Expiry<String, CachedPem> for PemExpiry {
    fn expire_after_create(&self, _host: &String, value: &CachedPem, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _host: &String,
        value: &CachedPem,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// [`KeyCache`] on a `moka` future cache with per-entry expiry.
///
/// Concurrent writers for the same host simply overwrite each other.
#[derive(Clone)]
pub struct MokaKeyCache {
    cache: Cache<String, CachedPem>,
}

impl MokaKeyCache {
    pub fn new(max_hosts: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_hosts).expire_after(PemExpiry).build(),
        }
    }
}

#[async_trait]
impl KeyCache for MokaKeyCache {
    async fn get(&self, host: &str) -> Option<String> {
        self.cache.get(host).await.map(|cached| cached.pem.to_string())
    }

    async fn set(&self, host: &str, pem: String, ttl: Duration) {
        self.cache.insert(host.to_string(), CachedPem { pem: pem.into(), ttl }).await;
    }
}

/// Resolves an issuer's public signing key from `https://{host}/.well-known/{namespace}/oauth2.pem`.
#[derive(Clone)]
pub struct KeyResolver {
    // The resolver is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    fetcher: Arc<dyn KeyFetcher>,
    cache: Arc<dyn KeyCache>,
    namespace: String,
    ttl: Duration,
    fetch_timeout: Duration,
}

impl KeyResolver {
    /// Creates a resolver with the HTTPS fetcher and an in-memory cache sized from `config`.
    pub fn new(config: &Config) -> Self {
        Self::with_parts(
            config,
            Arc::new(HttpKeyFetcher::default()),
            Arc::new(MokaKeyCache::new(config.key_cache_capacity)),
        )
    }

    /// Creates a resolver with a custom transport and cache.
    pub fn with_parts(config: &Config, fetcher: Arc<dyn KeyFetcher>, cache: Arc<dyn KeyCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                cache,
                namespace: config.well_known_namespace.clone(),
                ttl: config.key_cache_ttl,
                fetch_timeout: config.fetch_timeout,
            }),
        }
    }

    /// Returns the verification key published by the issuer's host.
    ///
    /// A fetched body is cached under the host for the configured TTL whether or not it
    /// is usable, so an issuer without a key is not asked again until the entry expires.
    /// A failed signature check never triggers a refresh.
    ///
    /// # Errors
    ///
    /// [`NilaDcrError::InvalidHost`] if no host can be read from `issuer`,
    /// [`NilaDcrError::Timeout`] if the fetch exceeds its deadline (not cached),
    /// [`NilaDcrError::EmptyBody`] if the host published nothing or the fetch failed,
    /// and [`NilaDcrError::InvalidKey`] if the body is not an RSA public key.
    #[instrument(skip(self), err)]
    pub async fn resolve(&self, issuer: &str) -> Result<VerifyingKey, NilaDcrError> {
        let host = issuer_host(issuer)?;

        let pem = match self.inner.cache.get(&host).await {
            Some(pem) => {
                debug!(%host, "Signing key cache hit");
                pem
            }
            None => {
                debug!(%host, "Signing key cache miss. Fetching from well-known endpoint.");
                let pem = self.fetch(&host).await?;
                self.inner.cache.set(&host, pem.clone(), self.inner.ttl).await;
                pem
            }
        };

        if pem.trim().is_empty() {
            return Err(NilaDcrError::EmptyBody(host));
        }
        VerifyingKey::rsa_pem(&pem)
    }

    /// The well-known key URL for `host`.
    pub fn well_known_url(&self, host: &str) -> Result<Url, NilaDcrError> {
        let url = format!("https://{}/.well-known/{}/oauth2.pem", host, self.inner.namespace);
        Url::parse(&url).map_err(|e| NilaDcrError::InvalidUrl(e.to_string()))
    }

    async fn fetch(&self, host: &str) -> Result<String, NilaDcrError> {
        let url = self.well_known_url(host)?;
        let deadline = self.inner.fetch_timeout;
        match tokio::time::timeout(deadline, self.inner.fetcher.fetch(&url)).await {
            Err(_) => Err(NilaDcrError::Timeout { operation: "signing key fetch", after: deadline }),
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => {
                warn!(%url, error = %e, "Failed to fetch signing key. Caching empty result.");
                Ok(String::new())
            }
        }
    }
}

fn issuer_host(issuer: &str) -> Result<String, NilaDcrError> {
    Url::parse(issuer)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .filter(|host| !host.is_empty())
        .ok_or_else(|| NilaDcrError::InvalidHost(issuer.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PUBLIC_KEY_PEM: &str = include_str!("../tests/fixtures/rsa_public_key.pem");

    struct StubFetcher {
        body: Result<String, ()>,
        calls: AtomicUsize,
        urls: std::sync::Mutex<Vec<String>>,
    }

    impl StubFetcher {
        fn new(body: Result<&str, ()>) -> Arc<Self> {
            Arc::new(Self {
                body: body.map(str::to_string),
                calls: AtomicUsize::new(0),
                urls: Default::default(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeyFetcher for StubFetcher {
        async fn fetch(&self, url: &Url) -> Result<String, NilaDcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            self.body.clone().map_err(|_| NilaDcrError::KeyFetch("connection refused".into()))
        }
    }

    struct SlowFetcher;

    #[async_trait]
    impl KeyFetcher for SlowFetcher {
        async fn fetch(&self, _url: &Url) -> Result<String, NilaDcrError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    fn resolver(fetcher: Arc<dyn KeyFetcher>, ttl: Duration) -> KeyResolver {
        let config = ConfigBuilder::new()
            .key_cache_ttl(ttl)
            .fetch_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        KeyResolver::with_parts(&config, fetcher, Arc::new(MokaKeyCache::new(100)))
    }

    #[tokio::test]
    async fn resolves_and_caches_published_key() {
        let fetcher = StubFetcher::new(Ok(PUBLIC_KEY_PEM));
        let resolver = resolver(fetcher.clone(), Duration::from_secs(300));

        assert!(resolver.resolve("https://A.example/some/path").await.is_ok());
        assert!(resolver.resolve("https://a.example").await.is_ok());

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            fetcher.urls.lock().unwrap()[0],
            "https://a.example/.well-known/nila/oauth2.pem"
        );
    }

    #[tokio::test]
    async fn empty_body_is_cached_until_expiry() {
        let fetcher = StubFetcher::new(Ok(""));
        let resolver = resolver(fetcher.clone(), Duration::from_millis(200));

        assert!(matches!(resolver.resolve("https://a.example").await, Err(NilaDcrError::EmptyBody(h)) if h == "a.example"));
        assert!(matches!(resolver.resolve("https://a.example").await, Err(NilaDcrError::EmptyBody(_))));
        assert_eq!(fetcher.calls(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(matches!(resolver.resolve("https://a.example").await, Err(NilaDcrError::EmptyBody(_))));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn transport_failure_is_cached_as_empty() {
        let fetcher = StubFetcher::new(Err(()));
        let resolver = resolver(fetcher.clone(), Duration::from_secs(300));

        assert!(matches!(resolver.resolve("https://a.example").await, Err(NilaDcrError::EmptyBody(_))));
        assert!(matches!(resolver.resolve("https://a.example").await, Err(NilaDcrError::EmptyBody(_))));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn unparsable_key_is_reported() {
        let fetcher = StubFetcher::new(Ok("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n"));
        let resolver = resolver(fetcher, Duration::from_secs(300));
        assert!(matches!(resolver.resolve("https://a.example").await, Err(NilaDcrError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn invalid_issuer_host() {
        let fetcher = StubFetcher::new(Ok(PUBLIC_KEY_PEM));
        let resolver = resolver(fetcher.clone(), Duration::from_secs(300));
        for issuer in ["not a url", "mailto:someone@a.example", ""] {
            assert!(matches!(resolver.resolve(issuer).await, Err(NilaDcrError::InvalidHost(_))));
        }
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn slow_fetch_times_out_without_caching() {
        let resolver = resolver(Arc::new(SlowFetcher), Duration::from_secs(300));
        let err = resolver.resolve("https://a.example").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(resolver.inner.cache.get("a.example").await.is_none());
    }
}

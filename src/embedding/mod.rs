//! Embedding provider abstraction.
//!
//! The core never talks to an embedding service directly; it goes through
//! [`EmbeddingProvider`], which concrete implementations (HTTP clients,
//! local models) satisfy. Retries, rate limits, and timeouts are the
//! concrete implementation's concern, not the core's.
//!
//! Providers are selected by name through a [`ProviderRegistry`]. The
//! registry is an explicit value passed through configuration rather than
//! process-wide mutable state, so tests can swap it freely; a default
//! instance with the built-in mock is available via `Default`.

use crate::error::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Capability to turn text into fixed-dimension embedding vectors.
///
/// Every vector produced must have exactly `dimensions()` entries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name, e.g. `"mock"`.
    fn name(&self) -> &str;

    /// Model identifier, e.g. `"mock-deterministic"`.
    fn model(&self) -> &str;

    /// Embedding dimension of every produced vector.
    fn dimensions(&self) -> usize;

    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embeds a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

impl std::fmt::Debug for dyn EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("name", &self.name())
            .field("model", &self.model())
            .finish()
    }
}

/// Factory producing a configured provider instance.
pub type ProviderFactory = Arc<dyn Fn() -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync>;

/// Name -> factory mapping for provider selection.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry with no providers.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with the built-in providers registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(
            "mock",
            Arc::new(|| Ok(Arc::new(MockProvider::default()) as Arc<dyn EmbeddingProvider>)),
        );
        registry
    }

    /// Registers (or replaces) a named factory.
    pub fn register(&mut self, name: &str, factory: ProviderFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Instantiates a provider by name.
    ///
    /// # Errors
    /// [`Error::Config`] for unknown names.
    pub fn create(&self, name: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        match self.factories.get(name) {
            Some(factory) => factory(),
            None => Err(Error::Config(format!("unknown embedding provider: {name}"))),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Wraps two providers: calls `primary`, and on any failure returns
/// `secondary`'s result for the same input.
pub fn with_fallback(
    primary: Arc<dyn EmbeddingProvider>,
    secondary: Arc<dyn EmbeddingProvider>,
) -> Arc<dyn EmbeddingProvider> {
    Arc::new(FallbackProvider { primary, secondary })
}

struct FallbackProvider {
    primary: Arc<dyn EmbeddingProvider>,
    secondary: Arc<dyn EmbeddingProvider>,
}

#[async_trait]
impl EmbeddingProvider for FallbackProvider {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn model(&self) -> &str {
        self.primary.model()
    }

    fn dimensions(&self) -> usize {
        self.primary.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.primary.embed(text).await {
            Ok(vector) => Ok(vector),
            Err(e) => {
                warn!("provider {} failed, falling back: {e}", self.primary.name());
                self.secondary.embed(text).await
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self.primary.embed_batch(texts).await {
            Ok(vectors) => Ok(vectors),
            Err(e) => {
                warn!("provider {} failed, falling back: {e}", self.primary.name());
                self.secondary.embed_batch(texts).await
            }
        }
    }
}

/// Default dimension of the mock provider.
pub const MOCK_DIMENSIONS: usize = 64;

/// Deterministic embedding provider for tests.
///
/// Vectors are derived from the SHA-256 digest of the input text, expanded
/// by chained hashing and L2-normalized: the same text always produces the
/// same unit vector, different texts almost surely different ones. The
/// vectors carry no semantics; tests that need controlled similarity
/// implement [`EmbeddingProvider`] directly.
pub struct MockProvider {
    dimensions: usize,
}

impl MockProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dimensions);
        let mut digest = Sha256::digest(text.as_bytes());
        'outer: loop {
            for byte in digest.iter() {
                values.push(f32::from(*byte) / 127.5 - 1.0);
                if values.len() == self.dimensions {
                    break 'outer;
                }
            }
            digest = Sha256::digest(digest);
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(MOCK_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-deterministic"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

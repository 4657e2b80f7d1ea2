use crate::error::{ResocketError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Trait for providing the connection URL dynamically
///
/// Called on every connection attempt (the initial one and every retry or
/// reconnect), which allows refreshing short-lived tokens embedded in the
/// URL.
///
/// # Example
/// ```ignore
/// struct SignedUrl {
///     base: String,
///     tokens: TokenService,
/// }
///
/// #[async_trait::async_trait]
/// impl UrlProvider for SignedUrl {
///     async fn resolve(&self) -> Result<String> {
///         let token = self.tokens.fresh().await?;
///         Ok(format!("{}?token={}", self.base, token))
///     }
/// }
/// ```
#[async_trait]
pub trait UrlProvider: Send + Sync {
    /// Produce the URL for the next connection attempt
    async fn resolve(&self) -> Result<String>;
}

/// URL provider wrapping an async closure
pub struct FnUrlProvider<F> {
    f: F,
}

impl<F, Fut> FnUrlProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> UrlProvider for FnUrlProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    async fn resolve(&self) -> Result<String> {
        (self.f)().await
    }
}

/// Where the connection URL comes from
#[derive(Clone)]
pub enum UrlSource {
    Static(String),
    Dynamic(Arc<dyn UrlProvider>),
}

impl UrlSource {
    /// Resolve the URL for one attempt
    pub fn resolve(&self) -> BoxFuture<'static, Result<String>> {
        match self {
            UrlSource::Static(url) => futures::future::ready(Ok(url.clone())).boxed(),
            UrlSource::Dynamic(provider) => {
                let provider = Arc::clone(provider);
                async move {
                    let url = provider.resolve().await?;
                    if url.is_empty() {
                        return Err(ResocketError::UrlResolution("provider returned an empty URL".into()));
                    }
                    Ok(url)
                }
                .boxed()
            }
        }
    }
}

impl std::fmt::Debug for UrlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlSource::Static(url) => f.debug_tuple("Static").field(url).finish(),
            UrlSource::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<&str> for UrlSource {
    fn from(url: &str) -> Self {
        UrlSource::Static(url.to_string())
    }
}

impl From<String> for UrlSource {
    fn from(url: String) -> Self {
        UrlSource::Static(url)
    }
}

use std::future::Future;
use std::pin::Pin;

/// The single generative-model capability: text in, text out.
///
/// Consumers hold an `Option<&dyn Generate>`; `None` selects each stage's
/// deterministic fallback.
pub trait Generate: Send + Sync {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

//! Model provider trait and implementations.
//!
//! The [`ModelProvider`] trait is the single seam between the pipeline and a
//! hosted model. The enrichment stage holds a `dyn ModelProvider`, which keeps
//! tests free of network access.
//!
//! # Example
//!
//! ```ignore
//! use flowlens_models::providers::{ChatRequest, Message, ModelProvider};
//!
//! async fn summarize(provider: &dyn ModelProvider) -> flowlens_models::Result<String> {
//!     let request = ChatRequest::new("gpt-4o", vec![Message::user("Summarize ...")])
//!         .temperature(0.0);
//!     Ok(provider.chat(request).await?.content)
//! }
//! ```

mod openai;
mod types;

use async_trait::async_trait;

pub use openai::{DEFAULT_OPENAI_BASE_URL, OpenAiProvider};
pub use types::*;

use crate::Result;

/// Trait for hosted chat completion providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Returns the provider name (e.g., "openai").
    fn name(&self) -> &str;

    /// Perform a chat completion request.
    ///
    /// Returns the complete response with content and usage statistics.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}

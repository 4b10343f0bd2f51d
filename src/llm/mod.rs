//! LLM provider adapters, fallback chains and the per-bot factory.

pub mod adapter;
pub mod anthropic;
pub mod factory;
pub mod fallback;
pub mod ollama;
pub mod openai;

pub use adapter::{CompletionRequest, LlmAdapter, LlmConfig, LlmProvider};
pub use factory::LlmFactory;
pub use fallback::{FallbackChain, PromptCache};

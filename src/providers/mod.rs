//! Concrete provider clients.

pub mod openai_compatible;
pub use openai_compatible::OpenAiCompatibleProvider;

pub mod azure;
pub use azure::AzureOpenAiProvider;

pub mod anthropic;
pub use anthropic::AnthropicProvider;

pub mod gemini;
pub use gemini::GeminiProvider;

#[cfg(feature = "bedrock")]
pub mod bedrock;
#[cfg(feature = "bedrock")]
pub use bedrock::BedrockProvider;

pub mod mock;
pub use mock::{MockChatProvider, MockEmbeddingProvider};

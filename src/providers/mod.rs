pub mod embedding;
pub mod lexical;
pub mod ollama;

pub use embedding::{build_provider, EmbeddingProvider, OpenAIEmbeddingProvider};
pub use lexical::LexicalEmbeddingProvider;
pub use ollama::OllamaProvider;

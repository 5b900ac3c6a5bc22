use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ResolveError;

/// Engine tuning knobs. Every field has a default so partial files deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub similarity_threshold: f32,
    pub considerable_threshold: f32,
    pub top_k: usize,
    pub decomposition_enabled: bool,
    /// Reduced acceptance threshold applied to each span of a decomposed utterance.
    pub decomposition_threshold: f32,
    /// Relaxed threshold for in-category approximation. Defaults to the midpoint
    /// of the considerable and similarity thresholds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approximation_threshold: Option<f32>,
    pub embedding_timeout_ms: u64,
    pub max_suggestions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            considerable_threshold: 0.5,
            top_k: 5,
            decomposition_enabled: true,
            decomposition_threshold: 0.6,
            approximation_threshold: None,
            embedding_timeout_ms: 5_000,
            max_suggestions: 3,
        }
    }
}

impl EngineConfig {
    pub fn effective_approximation_threshold(&self) -> f32 {
        self.approximation_threshold
            .unwrap_or((self.considerable_threshold + self.similarity_threshold) / 2.0)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ResolveError> {
        let in_range = |name: &str, value: f32| {
            if value.is_finite() && (-1.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ResolveError::InvalidConfiguration(format!(
                    "{} must lie in [-1, 1], got {}",
                    name, value
                )))
            }
        };

        in_range("similarity_threshold", self.similarity_threshold)?;
        in_range("considerable_threshold", self.considerable_threshold)?;
        in_range("decomposition_threshold", self.decomposition_threshold)?;

        if self.considerable_threshold >= self.similarity_threshold {
            return Err(ResolveError::InvalidConfiguration(format!(
                "considerable_threshold ({}) must be lower than similarity_threshold ({})",
                self.considerable_threshold, self.similarity_threshold
            )));
        }

        if self.decomposition_threshold < self.considerable_threshold
            || self.decomposition_threshold > self.similarity_threshold
        {
            return Err(ResolveError::InvalidConfiguration(format!(
                "decomposition_threshold ({}) must lie between considerable_threshold ({}) and similarity_threshold ({})",
                self.decomposition_threshold, self.considerable_threshold, self.similarity_threshold
            )));
        }

        if let Some(approx) = self.approximation_threshold {
            in_range("approximation_threshold", approx)?;
            if approx < self.considerable_threshold || approx > self.similarity_threshold {
                return Err(ResolveError::InvalidConfiguration(format!(
                    "approximation_threshold ({}) must lie between considerable_threshold ({}) and similarity_threshold ({})",
                    approx, self.considerable_threshold, self.similarity_threshold
                )));
            }
        }

        if self.top_k == 0 {
            return Err(ResolveError::InvalidConfiguration(
                "top_k must be at least 1".to_string(),
            ));
        }

        if self.embedding_timeout_ms == 0 {
            return Err(ResolveError::InvalidConfiguration(
                "embedding_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    #[default]
    Lexical,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl EmbeddingProviderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lexical" | "local" => Some(EmbeddingProviderKind::Lexical),
            "openai" | "open_ai" => Some(EmbeddingProviderKind::OpenAi),
            "ollama" => Some(EmbeddingProviderKind::Ollama),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub embedding: EmbeddingSettings,
    pub server: ServerConfig,
    pub manifest: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Reads a TOML file, then lets the environment override it.
    pub fn load(path: &Path) -> Result<Self, ResolveError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ResolveError::InvalidConfiguration(format!("reading {}: {}", path.display(), e))
        })?;
        let mut config: Config = toml::from_str(&raw).map_err(|e| {
            ResolveError::InvalidConfiguration(format!("parsing {}: {}", path.display(), e))
        })?;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("OPENAI_API_KEY") {
            self.embedding.openai_api_key = Some(key);
        }
        if let Some(kind) = var("PACT_EMBEDDING_PROVIDER")
            .as_deref()
            .and_then(EmbeddingProviderKind::from_str)
        {
            self.embedding.provider = kind;
        }
        if let Some(model) = var("PACT_EMBEDDING_MODEL") {
            self.embedding.model = Some(model);
        }
        if let Some(url) = var("PACT_EMBEDDING_URL") {
            self.embedding.base_url = Some(url);
        }
        if let Some(v) = var("PACT_SIMILARITY_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.engine.similarity_threshold = v;
        }
        if let Some(v) = var("PACT_CONSIDERABLE_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.engine.considerable_threshold = v;
        }
        if let Some(v) = var("PACT_TOP_K").and_then(|v| v.parse().ok()) {
            self.engine.top_k = v;
        }
        if let Some(v) = var("PACT_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
        }
        if let Some(path) = var("PACT_MANIFEST") {
            self.manifest = Some(PathBuf::from(path));
        }
    }
}

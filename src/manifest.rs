//! Declarative intents and capabilities, loaded from YAML, TOML or JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ResolveError;
use crate::storage::{CapabilityRegistry, IntentCatalog};
use crate::types::{Capability, Intent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Toml,
    Json,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(ManifestFormat::Yaml),
            "toml" => Some(ManifestFormat::Toml),
            "json" => Some(ManifestFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub intents: Vec<Intent>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ResolveError> {
        let format = ManifestFormat::from_path(path).ok_or_else(|| {
            ResolveError::Manifest(format!(
                "{}: expected a .yaml, .yml, .toml or .json file",
                path.display()
            ))
        })?;
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ResolveError::Manifest(format!("reading {}: {}", path.display(), e)))?;
        Self::parse(&raw, format)
            .map_err(|e| ResolveError::Manifest(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(raw: &str, format: ManifestFormat) -> Result<Self, String> {
        match format {
            ManifestFormat::Yaml => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
            ManifestFormat::Toml => toml::from_str(raw).map_err(|e| e.to_string()),
            ManifestFormat::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
        }
    }

    /// Registers everything into existing stores. Stops at the first invalid entry;
    /// entries registered before it stay registered.
    pub fn apply(
        &self,
        catalog: &IntentCatalog,
        registry: &CapabilityRegistry,
    ) -> Result<(), ResolveError> {
        for intent in &self.intents {
            catalog.register(intent.clone())?;
        }
        for capability in &self.capabilities {
            registry.register(capability.clone())?;
        }
        log::info!(
            "manifest: {} intents, {} capabilities",
            self.intents.len(),
            self.capabilities.len()
        );
        Ok(())
    }

    pub fn into_stores(self) -> Result<(IntentCatalog, CapabilityRegistry), ResolveError> {
        let catalog = IntentCatalog::with_intents(self.intents)?;
        let registry = CapabilityRegistry::with_capabilities(self.capabilities)?;
        Ok((catalog, registry))
    }
}

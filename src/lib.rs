pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod providers;
pub mod storage;
pub mod types;

pub use config::{Config, EngineConfig};
pub use engine::ResolutionEngine;
pub use error::{ResolveError, ResolveResult};
pub use manifest::Manifest;
pub use types::*;

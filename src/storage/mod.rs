pub mod catalog;
pub mod registry;

pub use catalog::{CatalogSnapshot, IntentCatalog, IntentEntry, Registration};
pub use registry::{CapabilityRegistry, RegistrySnapshot};

pub mod fallback;
pub mod matcher;
pub mod negotiator;
pub mod resolver;
pub mod similarity;

pub use fallback::{FallbackChain, ResolutionContext, ResolutionStage, StageOutcome};
pub use matcher::SemanticMatcher;
pub use negotiator::negotiate;
pub use resolver::ResolutionEngine;

pub mod config;
pub mod languages;
pub mod store;
pub mod types;

// Re-export commonly used types for convenience
pub use config::Config;
pub use languages::{LanguageRecipe, LanguageRegistry};
pub use store::JobStore;
pub use types::{JobOutcome, JobRecord, JobStatus, Language, NewJob};

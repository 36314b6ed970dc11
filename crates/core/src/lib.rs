pub mod config;
pub mod error;
pub mod registry;

pub use config::AppConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use registry::{generate_id, Registry};

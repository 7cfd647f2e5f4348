pub mod app;
pub mod bandwidth;
pub mod cache;
pub mod cli;
pub mod constants;
pub mod runtime;
pub mod sessions;
pub mod tools;
pub mod utils;

pub use app::{load_config, Config};
pub use bandwidth::TelemetrySampler;
pub use cache::{CachedQueryRunner, ResultCache};
pub use runtime::Services;
pub use sessions::DiagnosticSessionManager;
pub use utils::{LookingGlassError, Result};

// Gateway module for one-shot network tools - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod network;
mod requirements;

// Public re-exports - the ONLY way to access tool functionality
pub use network::{validate_target, NetworkTools, ToolOutput};
pub use requirements::{check_requirements, missing_requirements, ToolStatus};

// Gateway module for bandwidth telemetry - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod history;
mod interfaces;
mod sampler;
mod source;
mod types;

// Public re-exports - the ONLY way to access bandwidth functionality
pub use history::InterfaceHistory;
pub use sampler::{SamplerCore, SamplerSettings, TelemetrySampler};
pub use source::{CounterSource, SystemSource};
pub use types::{
    AddressFamily, CurrentRates, InterfaceAddress, InterfaceCounters, InterfaceInfo,
    InterfaceSample, InterfaceSnapshot, SamplerState, TelemetrySnapshot,
};

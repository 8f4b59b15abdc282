pub mod capabilities;
pub mod config;
pub mod core;

// Re-export commonly used items for convenience
pub use capabilities::Capabilities;
pub use config::AgentConfig;
pub use core::*;

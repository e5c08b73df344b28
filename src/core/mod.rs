// Core infrastructure shared by the transport, the fence and the task graph

pub mod config;
pub mod errors;
pub mod logging;

// Re-export commonly used types
pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use errors::{Result, TesseraError};
pub use logging::init_logging;

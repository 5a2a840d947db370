//! Utility modules
//!
//! Logging initialization and well-known filesystem locations.

pub mod logging;
pub mod paths;

pub use logging::init_logging;

//! Process bootstrap for FoodHub binaries: layered configuration, logging,
//! home directory resolution and shutdown signals.

pub mod config;
pub mod logging;
pub mod paths;
pub mod signals;

pub use config::*;
pub use logging::*;
pub use signals::*;

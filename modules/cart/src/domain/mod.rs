pub mod error;
pub mod model;
pub mod repo;
pub mod service;

pub use error::*;
pub use model::*;
pub use repo::*;
pub use service::*;

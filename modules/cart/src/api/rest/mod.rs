pub mod contracts;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use routes::*;

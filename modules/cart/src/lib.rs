//! Cart and order operations served through `apikit` contracts.

// === MODULE DEFINITION ===
pub mod module;
pub use module::CartModule;

// === CONTRACTS ===
// Shared with clients: the same values drive server routes and client calls.
pub use api::rest::contracts;

// === INTERNAL MODULES ===
// Exposed for tests; not a stable API.
#[doc(hidden)]
pub mod api;
#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod domain;

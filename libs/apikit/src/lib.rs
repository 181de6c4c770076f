//! Typed endpoint framework: contracts shared by the HTTP host and its clients.
//!
//! A [`contract::Contract`] describes one operation. The [`pipeline::Pipeline`]
//! enforces it on the server ([`host::ApiHost`] mounts it on axum), and the
//! `apikit-client` crate consumes the same value to build and cache calls.

pub mod contract;
pub mod envelope;
pub mod host;
pub mod identity;
pub mod openapi;
pub mod pipeline;
pub mod query;
pub mod schema;

pub use contract::{BuiltRequest, CacheHints, Contract, ContractBuilder, ContractError};
pub use envelope::{ApiFailure, Envelope};
pub use host::{ApiHost, HostConfig};
pub use identity::{bearer_token, Identity, IdentityProvider, Role, StaticIdentityProvider, TokenGrant};
pub use pipeline::{
    typed_handler, EndpointHandler, HandlerError, HandlerRequest, Pipeline, PipelineOutcome,
    RawRequest, Stage,
};
pub use schema::{
    AnySchema, EmptySchema, FieldError, JsonSchema, Schema, SchemaError, SchemaRef, TypedSchema,
    ValidationErrors,
};

/// Common imports for modules declaring contracts and handlers.
pub mod prelude {
    pub use crate::contract::{Contract, ContractBuilder, ContractError};
    pub use crate::envelope::Envelope;
    pub use crate::identity::{Identity, Role};
    pub use crate::pipeline::{typed_handler, EndpointHandler, HandlerError};
    pub use crate::schema::{SchemaRef, TypedSchema};
    pub use serde_json::Value;
}

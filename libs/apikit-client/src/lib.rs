//! Client half of the endpoint framework: a contract-aware API client, a
//! reactive cache store with request deduplication, and query, mutation and
//! form hooks built on it.

pub mod client;
pub mod form;
pub mod key;
pub mod mutation;
pub mod query;
pub mod store;
pub mod transport;

pub use client::{ApiClient, ClientError};
pub use form::{Form, FormError};
pub use key::{canonical_json, derive_query_key, MutationKey, QueryKey};
pub use mutation::{Mutation, MutationOptions, MutationState};
pub use query::Query;
pub use store::{CacheStore, QueryOptions, QueryState, QueryStatus};
pub use transport::{
    CredentialSource, HttpTransport, HttpTransportConfig, OutboundRequest, StaticCredentials,
    Transport, TransportError,
};

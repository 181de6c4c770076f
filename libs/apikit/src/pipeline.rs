//! Server request pipeline.
//!
//! Every request for a contract walks the same stages:
//!
//! `Unauthenticated -> RoleChecked -> UrlValidated -> BodyValidated -> HandlerExecuted -> ResponseValidated -> Sent`
//!
//! Any stage may short-circuit to a failure envelope; later stages never run
//! after a short-circuit. The pipeline holds no per-request state of its own.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{field::Empty, Instrument};

use crate::contract::Contract;
use crate::envelope::{ApiFailure, Envelope};
use crate::identity::{Identity, IdentityProvider};
use crate::query;

/// Last stage a request reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Unauthenticated,
    RoleChecked,
    UrlValidated,
    BodyValidated,
    HandlerExecuted,
    ResponseValidated,
    Sent,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Unauthenticated => "unauthenticated",
            Stage::RoleChecked => "role_checked",
            Stage::UrlValidated => "url_validated",
            Stage::BodyValidated => "body_validated",
            Stage::HandlerExecuted => "handler_executed",
            Stage::ResponseValidated => "response_validated",
            Stage::Sent => "sent",
        };
        f.write_str(name)
    }
}

/// Validated input handed to a business handler.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    /// Parsed request payload (query string for reads, JSON body for writes).
    pub data: Value,
    /// Parsed URL parameters.
    pub url: Value,
    /// `None` only for public contracts called without a credential.
    pub identity: Option<Identity>,
}

/// Business failure returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({error_code})")]
pub struct HandlerError {
    pub message: String,
    pub error_code: u16,
}

impl HandlerError {
    pub fn new(error_code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }
}

impl From<HandlerError> for ApiFailure {
    fn from(e: HandlerError) -> Self {
        ApiFailure::new(e.error_code, e.message)
    }
}

/// Business logic behind one contract.
#[async_trait]
pub trait EndpointHandler: Send + Sync {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, HandlerError>;
}

/// Handler built from an async function over typed payloads.
pub struct FnHandler<F, B, U, O, Fut> {
    f: F,
    _types: PhantomData<fn(B, U) -> (O, Fut)>,
}

/// Adapt `async fn(body, url, identity) -> Result<O, HandlerError>` into an [`EndpointHandler`].
///
/// Inputs were already validated by the pipeline, so a deserialisation failure
/// here means the DTO and the contract shape disagree; it is reported as 500.
pub fn typed_handler<F, B, U, O, Fut>(f: F) -> FnHandler<F, B, U, O, Fut>
where
    F: Fn(B, U, Option<Identity>) -> Fut + Send + Sync,
    B: DeserializeOwned + Send,
    U: DeserializeOwned + Send,
    O: Serialize,
    Fut: Future<Output = Result<O, HandlerError>> + Send,
{
    FnHandler {
        f,
        _types: PhantomData,
    }
}

#[async_trait]
impl<F, B, U, O, Fut> EndpointHandler for FnHandler<F, B, U, O, Fut>
where
    F: Fn(B, U, Option<Identity>) -> Fut + Send + Sync,
    B: DeserializeOwned + Send,
    U: DeserializeOwned + Send,
    O: Serialize,
    Fut: Future<Output = Result<O, HandlerError>> + Send,
{
    async fn handle(&self, request: HandlerRequest) -> Result<Value, HandlerError> {
        let body: B = serde_json::from_value(request.data)
            .map_err(|e| HandlerError::internal(format!("request payload mismatch: {e}")))?;
        let url: U = serde_json::from_value(request.url)
            .map_err(|e| HandlerError::internal(format!("url parameter mismatch: {e}")))?;
        let out = (self.f)(body, url, request.identity).await?;
        serde_json::to_value(out)
            .map_err(|e| HandlerError::internal(format!("response serialisation failed: {e}")))
    }
}

#[async_trait]
impl<T: EndpointHandler + ?Sized> EndpointHandler for Arc<T> {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, HandlerError> {
        (**self).handle(request).await
    }
}

/// Transport-neutral view of an incoming request.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub token: Option<String>,
    /// Raw path parameters as extracted by the router.
    pub path_params: Vec<(String, String)>,
    /// Raw query string, without `?`.
    pub query: Option<String>,
    pub body: Bytes,
}

/// Result of one pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub envelope: Envelope,
    /// Last stage reached before sending or short-circuiting.
    pub stage: Stage,
}

/// Executes contracts against handlers.
#[derive(Clone)]
pub struct Pipeline {
    identity: Arc<dyn IdentityProvider>,
}

impl Pipeline {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    pub async fn execute(
        &self,
        contract: &Contract,
        handler: &dyn EndpointHandler,
        request: RawRequest,
    ) -> PipelineOutcome {
        let operation = contract.identity();
        let span = tracing::info_span!(
            "pipeline",
            operation = %operation,
            stage = Empty,
            error_code = Empty,
        );

        async {
            let (stage, result) = self.run(contract, handler, request).await;
            let span = tracing::Span::current();
            span.record("stage", tracing::field::display(stage));

            let envelope = match result {
                Ok(data) => Envelope::success(data),
                Err(failure) => {
                    span.record("error_code", failure.error_code);
                    if failure.status().is_server_error() {
                        tracing::error!(code = failure.error_code, "{operation}: {}", failure.message);
                    } else {
                        tracing::warn!(code = failure.error_code, "{operation}: {}", failure.message);
                    }
                    Envelope::failure(failure.with_operation(operation.clone()))
                }
            };
            PipelineOutcome { envelope, stage }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        contract: &Contract,
        handler: &dyn EndpointHandler,
        request: RawRequest,
    ) -> (Stage, Result<Value, ApiFailure>) {
        // 1. identity and roles
        let identity = match request.token.as_deref() {
            Some(token) => self.identity.resolve(token).await,
            None => None,
        };
        if contract.requires_authentication() {
            match &identity {
                None => return (Stage::Unauthenticated, Err(ApiFailure::unauthenticated())),
                Some(id) if !contract.allows(id) => {
                    tracing::debug!(subject = %id.subject, "role check failed");
                    return (Stage::Unauthenticated, Err(ApiFailure::forbidden()));
                }
                Some(_) => {}
            }
        }

        // 2. URL parameters
        let raw_url = query::decode_pairs(request.path_params, contract.url_params().as_ref());
        let url = match contract.url_params().validate(&raw_url) {
            Ok(v) => v,
            Err(errors) => {
                return (
                    Stage::RoleChecked,
                    Err(ApiFailure::validation("invalid url parameters", errors)),
                )
            }
        };

        // 3. body
        let raw_body = if contract.is_read() {
            query::decode(request.query.as_deref().unwrap_or(""), contract.request().as_ref())
        } else if request.body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            match serde_json::from_slice::<Value>(&request.body) {
                Ok(v) => v,
                Err(e) => {
                    return (
                        Stage::UrlValidated,
                        Err(ApiFailure::new(400, format!("malformed JSON body: {e}"))),
                    )
                }
            }
        };
        let data = match contract.request().validate(&raw_body) {
            Ok(v) => v,
            Err(errors) => {
                return (
                    Stage::UrlValidated,
                    Err(ApiFailure::validation("invalid request", errors)),
                )
            }
        };

        // 4. handler; a panic is converted instead of unwinding into the host
        let call = handler.handle(HandlerRequest {
            data,
            url,
            identity,
        });
        let output = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return (Stage::BodyValidated, Err(e.into())),
            Err(panic) => {
                return (
                    Stage::BodyValidated,
                    Err(ApiFailure::internal(panic_message(panic.as_ref()))),
                )
            }
        };

        // 5. response shape
        match contract.response().validate(&output) {
            Ok(v) => (Stage::Sent, Ok(v)),
            Err(errors) => {
                tracing::error!(%errors, "handler output violates response shape");
                (
                    Stage::HandlerExecuted,
                    Err(ApiFailure::validation("invalid response", errors).with_code(500)),
                )
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

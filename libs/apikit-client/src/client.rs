//! Contract-aware API client.

use std::sync::Arc;

use apikit::{ApiFailure, Contract, ContractError, Envelope, ValidationErrors};
use serde_json::Value;

use crate::transport::{CredentialSource, OutboundRequest, Transport, TransportError};

/// Every way a client call can fail.
///
/// Cloneable so one failed fetch can be handed to every deduplicated waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Input rejected locally; nothing was sent.
    #[error("{operation}: invalid input: {errors}")]
    Validation {
        operation: String,
        errors: ValidationErrors,
    },

    /// The contract cannot be used with these inputs at all (bad placeholder).
    #[error(transparent)]
    Contract(ContractError),

    /// Authenticated contract with no credential; nothing was sent.
    #[error("{operation}: not authenticated")]
    Unauthenticated { operation: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a failure envelope.
    #[error("{}", .0.message)]
    Api(ApiFailure),

    /// The server's success payload does not match the response shape.
    #[error("{operation}: invalid response: {errors}")]
    InvalidResponse {
        operation: String,
        errors: ValidationErrors,
    },
}

impl ClientError {
    /// Field errors from local validation or from a server 400.
    pub fn field_errors(&self) -> Option<&[apikit::FieldError]> {
        match self {
            ClientError::Api(f) if f.error_code == 400 && !f.errors.is_empty() => {
                Some(f.errors.as_slice())
            }
            _ => None,
        }
    }

    /// Status-like code for display: local failures use the code the server
    /// would have produced.
    pub fn code(&self) -> u16 {
        match self {
            ClientError::Validation { .. } => 400,
            ClientError::Unauthenticated { .. } => 401,
            ClientError::Api(f) => f.error_code,
            ClientError::Contract(_)
            | ClientError::Transport(_)
            | ClientError::InvalidResponse { .. } => 500,
        }
    }
}

impl From<ContractError> for ClientError {
    fn from(e: ContractError) -> Self {
        match e {
            ContractError::Validation { operation, errors } => {
                ClientError::Validation { operation, errors }
            }
            other => ClientError::Contract(other),
        }
    }
}

/// Issues contract calls over a [`Transport`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialSource>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    /// Validate, send, and check the answer against `contract`.
    #[tracing::instrument(skip_all, fields(operation = %contract))]
    pub async fn call(
        &self,
        contract: &Contract,
        payload: &Value,
        url_params: &Value,
    ) -> Result<Value, ClientError> {
        let built = contract.build_request(payload, url_params)?;

        let bearer = if contract.requires_authentication() {
            match self.credentials.token() {
                Some(token) => Some(token),
                None => {
                    tracing::debug!("no credential for authenticated operation");
                    return Err(ClientError::Unauthenticated {
                        operation: contract.identity(),
                    });
                }
            }
        } else {
            None
        };

        let envelope = self
            .transport
            .send(OutboundRequest {
                method: built.method,
                url: built.url,
                body: built.body,
                bearer,
            })
            .await?;

        let data = match envelope {
            Envelope::Success { data } => data,
            Envelope::Failure(failure) => {
                tracing::debug!(code = failure.error_code, "server returned failure envelope");
                return Err(ClientError::Api(failure));
            }
        };

        contract
            .response()
            .validate(&data)
            .map_err(|errors| ClientError::InvalidResponse {
                operation: contract.identity(),
                errors,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StaticCredentials;
    use apikit::ContractBuilder;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recording {
        sent: Mutex<Vec<OutboundRequest>>,
        reply: Envelope<Value>,
    }

    #[async_trait]
    impl Transport for Recording {
        async fn send(&self, request: OutboundRequest) -> Result<Envelope<Value>, TransportError> {
            self.sent.lock().push(request);
            Ok(self.reply.clone())
        }
    }

    fn client(reply: Envelope<Value>, token: Option<&str>) -> (ApiClient, Arc<Recording>) {
        let transport = Arc::new(Recording {
            sent: Mutex::new(Vec::new()),
            reply,
        });
        let creds = match token {
            Some(t) => StaticCredentials::new(t),
            None => StaticCredentials::anonymous(),
        };
        (ApiClient::new(transport.clone(), Arc::new(creds)), transport)
    }

    fn cart() -> Contract {
        ContractBuilder::get("/v1/cart")
            .allow("CUSTOMER")
            .response_any("Cart")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn attaches_bearer_for_authenticated_contracts() {
        let (client, transport) = client(Envelope::success(json!([])), Some("tok"));
        let data = client.call(&cart(), &json!({}), &json!({})).await.unwrap();
        assert_eq!(data, json!([]));

        let sent = transport.sent.lock();
        assert_eq!(sent[0].url, "/v1/cart");
        assert_eq!(sent[0].bearer.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn missing_credential_short_circuits() {
        let (client, transport) = client(Envelope::success(json!([])), None);
        let err = client.call(&cart(), &json!({}), &json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthenticated { .. }));
        assert_eq!(err.code(), 401);
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn failure_envelope_becomes_api_error() {
        let reply = Envelope::failure(ApiFailure::new(409, "sold out"));
        let (client, _) = client(reply, Some("tok"));
        let err = client.call(&cart(), &json!({}), &json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "sold out");
        assert_eq!(err.code(), 409);
    }

    #[tokio::test]
    async fn response_shape_is_checked() {
        let contract = ContractBuilder::get("/v1/count")
            .public()
            .response(Arc::new(
                apikit::JsonSchema::new("Count", json!({ "type": "integer" })).unwrap(),
            ))
            .build()
            .unwrap();
        let (client, _) = client(Envelope::success(json!("seven")), None);
        let err = client.call(&contract, &json!(null), &json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse { .. }));
    }
}

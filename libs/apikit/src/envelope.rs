//! Uniform response envelope.
//!
//! Every response, success or failure, has one of two wire shapes:
//!
//! ```json
//! { "success": true,  "data": ... }
//! { "success": false, "message": "...", "errorCode": 400, "errors": [...], "operation": "POST /v1/cart" }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use utoipa::ToSchema;

use crate::schema::{FieldError, ValidationErrors};

/// Failure half of the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiFailure {
    pub message: String,
    pub error_code: u16,
    /// Per-field messages for validation failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    /// `METHOD path` of the contract that produced the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl ApiFailure {
    pub fn new(error_code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code,
            errors: Vec::new(),
            operation: None,
        }
    }

    pub fn unauthenticated() -> Self {
        Self::new(401, "not authenticated")
    }

    pub fn forbidden() -> Self {
        Self::new(403, "not authorized")
    }

    pub fn validation(message: impl Into<String>, errors: ValidationErrors) -> Self {
        Self {
            errors: errors.into_vec(),
            ..Self::new(400, message)
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    pub fn with_code(mut self, error_code: u16) -> Self {
        self.error_code = error_code;
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// HTTP status carrying this failure; unknown codes map to 500.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.error_code)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// `{success, data}` / `{success, message, errorCode}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T = Value> {
    Success { data: T },
    Failure(ApiFailure),
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Envelope::Success { data }
    }

    pub fn failure(failure: ApiFailure) -> Self {
        Envelope::Failure(failure)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }

    pub fn failure_ref(&self) -> Option<&ApiFailure> {
        match self {
            Envelope::Failure(f) => Some(f),
            Envelope::Success { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<T, ApiFailure> {
        match self {
            Envelope::Success { data } => Ok(data),
            Envelope::Failure(f) => Err(f),
        }
    }
}

impl<T> From<Result<T, ApiFailure>> for Envelope<T> {
    fn from(result: Result<T, ApiFailure>) -> Self {
        match result {
            Ok(data) => Envelope::Success { data },
            Err(f) => Envelope::Failure(f),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOut<'a, T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(flatten)]
    failure: Option<&'a ApiFailure>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIn<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    errors: Vec<FieldError>,
    #[serde(default)]
    operation: Option<String>,
}

impl<T: Serialize> Serialize for Envelope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Envelope::Success { data } => WireOut {
                success: true,
                data: Some(data),
                failure: None,
            },
            Envelope::Failure(f) => WireOut {
                success: false,
                data: None,
                failure: Some(f),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Envelope<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireIn::<T>::deserialize(deserializer)?;
        if wire.success {
            match wire.data {
                Some(data) => Ok(Envelope::Success { data }),
                // `data: null` and an absent `data` both mean "no payload"
                None => T::deserialize(serde_json::Value::Null)
                    .map(|data| Envelope::Success { data })
                    .map_err(serde::de::Error::custom),
            }
        } else {
            Ok(Envelope::Failure(ApiFailure {
                message: wire.message.unwrap_or_else(|| "unknown error".to_string()),
                error_code: wire.error_code.unwrap_or(500),
                errors: wire.errors,
                operation: wire.operation,
            }))
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = match &self {
            Envelope::Success { .. } => StatusCode::OK,
            Envelope::Failure(f) => f.status(),
        };
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_wire_shape() {
        let env = Envelope::success(json!([]));
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({ "success": true, "data": [] })
        );
    }

    #[test]
    fn failure_wire_shape() {
        let env: Envelope = Envelope::failure(ApiFailure::new(500, "boom"));
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({ "success": false, "message": "boom", "errorCode": 500 })
        );
    }

    #[test]
    fn failure_round_trips_with_field_errors() {
        let failure = ApiFailure::validation(
            "invalid request body",
            ValidationErrors::single("menuItemId", "is required"),
        )
        .with_operation("POST /v1/cart");
        let text = serde_json::to_string(&Envelope::<Value>::failure(failure.clone())).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, Envelope::Failure(failure));
    }

    #[test]
    fn success_without_data_deserializes_to_null() {
        let back: Envelope = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(back, Envelope::success(Value::Null));
    }

    #[test]
    fn unusual_codes_map_to_internal_status() {
        assert_eq!(ApiFailure::new(4001, "x").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiFailure::new(200, "x").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiFailure::new(409, "x").status(), StatusCode::CONFLICT);
    }
}

//! Endpoint contracts.
//!
//! A [`Contract`] is the immutable description of one API operation: method,
//! path template, the three payload shapes, the role allow-list and the
//! documentation/caching metadata. The server pipeline and the client both
//! validate traffic against the same contract value.
//!
//! Contracts are assembled with a type-state [`ContractBuilder`]: `build()` is
//! only callable once an access rule (`allow` / `public`) and a response shape
//! have been declared.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::identity::{Identity, Role};
use crate::query;
use crate::schema::{
    self, AnySchema, EmptySchema, FieldError, SchemaError, SchemaRef, TypedSchema, ValidationErrors,
};

/// Type-state markers for compile-time enforcement
pub mod state {
    /// Marker for missing required components
    #[derive(Debug, Clone, Copy)]
    pub struct Missing;

    /// Marker for present required components
    #[derive(Debug, Clone, Copy)]
    pub struct Present;
}

pub use state::{Missing, Present};

/// Cache hints consumed by the client store when a query call leaves them unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheHints {
    pub stale_time: Option<Duration>,
    pub cache_time: Option<Duration>,
}

/// Errors raised while building or using a contract.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContractError {
    /// Ordinary input failure: every offending field is listed.
    #[error("{operation}: {errors}")]
    Validation {
        operation: String,
        errors: ValidationErrors,
    },

    /// A path placeholder had no value. Programmer error.
    #[error("{operation}: no value for path placeholder '{{{name}}}'")]
    UnresolvedPlaceholder { operation: String, name: String },

    /// The path template itself is malformed or names an undeclared parameter.
    #[error("{operation}: invalid path template: {reason}")]
    Template { operation: String, reason: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl ContractError {
    /// Fatal errors indicate a bug in the caller and must never be retried.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ContractError::Validation { .. })
    }

    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            ContractError::Validation { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

/// Outcome of [`Contract::build_request`]: everything needed to issue the call.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub method: Method,
    /// Path with placeholders substituted, plus the query string for reads.
    pub url: String,
    /// JSON body for write operations.
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

fn parse_template(path: &str) -> Result<Vec<Segment>, String> {
    if !path.starts_with('/') {
        return Err(format!("'{path}' must start with '/'"));
    }
    let mut segments = Vec::new();
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("unclosed '{{' in '{path}'"))?;
        let name = &after[..close];
        if name.is_empty() || name.contains('{') || name.contains('/') {
            return Err(format!("bad placeholder '{{{name}}}' in '{path}'"));
        }
        segments.push(Segment::Placeholder(name.to_string()));
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(format!("unbalanced '}}' in '{path}'"));
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

fn placeholder_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

struct ContractInner {
    method: Method,
    path: String,
    segments: Vec<Segment>,
    operation_id: String,
    request: SchemaRef,
    response: SchemaRef,
    url_params: SchemaRef,
    roles: Vec<Role>,
    summary: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
    field_docs: BTreeMap<String, String>,
    request_example: Option<Value>,
    response_example: Option<Value>,
    error_codes: BTreeMap<u16, String>,
    cache: CacheHints,
}

/// Immutable descriptor of one API operation. Clones share the same data.
#[derive(Clone)]
pub struct Contract {
    inner: Arc<ContractInner>,
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("method", &self.inner.method)
            .field("path", &self.inner.path)
            .field("roles", &self.inner.roles)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.inner.method, self.inner.path)
    }
}

impl Contract {
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// `METHOD path`, e.g. `GET /v1/cart`.
    pub fn identity(&self) -> String {
        self.to_string()
    }

    pub fn operation_id(&self) -> &str {
        &self.inner.operation_id
    }

    pub fn request(&self) -> &SchemaRef {
        &self.inner.request
    }

    pub fn response(&self) -> &SchemaRef {
        &self.inner.response
    }

    pub fn url_params(&self) -> &SchemaRef {
        &self.inner.url_params
    }

    pub fn roles(&self) -> &[Role] {
        &self.inner.roles
    }

    pub fn summary(&self) -> Option<&str> {
        self.inner.summary.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.inner.tags
    }

    pub fn field_docs(&self) -> &BTreeMap<String, String> {
        &self.inner.field_docs
    }

    pub fn request_example(&self) -> Option<&Value> {
        self.inner.request_example.as_ref()
    }

    pub fn response_example(&self) -> Option<&Value> {
        self.inner.response_example.as_ref()
    }

    pub fn error_codes(&self) -> &BTreeMap<u16, String> {
        &self.inner.error_codes
    }

    pub fn cache_hints(&self) -> CacheHints {
        self.inner.cache
    }

    /// Reads carry their payload in the query string instead of a body.
    pub fn is_read(&self) -> bool {
        self.inner.method == Method::GET || self.inner.method == Method::HEAD
    }

    pub fn placeholders(&self) -> Vec<&str> {
        self.inner
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    pub fn requires_authentication(&self) -> bool {
        !self.inner.roles.iter().any(Role::is_public)
    }

    /// Whether `identity` may call this operation.
    pub fn allows(&self, identity: &Identity) -> bool {
        !self.requires_authentication() || identity.has_any_role(&self.inner.roles)
    }

    /// Validate the inputs and produce the concrete URL and body.
    ///
    /// Body errors keep their own paths; URL parameter errors are reported
    /// under `url.`. Both sets are collected before failing.
    pub fn build_request(
        &self,
        payload: &Value,
        url_params: &Value,
    ) -> Result<BuiltRequest, ContractError> {
        let body = self.inner.request.validate(payload);
        let url = self.inner.url_params.validate(url_params);

        let (body, url) = match (body, url) {
            (Ok(body), Ok(url)) => (body, url),
            (body, url) => {
                let mut errors = Vec::new();
                if let Err(e) = body {
                    errors.extend(e.into_vec());
                }
                if let Err(e) = url {
                    errors.extend(e.into_vec().into_iter().map(|e| e.prefixed("url")));
                }
                return Err(ContractError::Validation {
                    operation: self.identity(),
                    errors: ValidationErrors::new(errors),
                });
            }
        };

        let mut path = self.render_path(&url)?;
        if self.is_read() {
            let qs = query::encode(&body);
            if !qs.is_empty() {
                path.push('?');
                path.push_str(&qs);
            }
            Ok(BuiltRequest {
                method: self.inner.method.clone(),
                url: path,
                body: None,
            })
        } else {
            Ok(BuiltRequest {
                method: self.inner.method.clone(),
                url: path,
                body: Some(body),
            })
        }
    }

    /// Substitute every placeholder with its percent-encoded value.
    pub fn render_path(&self, url_params: &Value) -> Result<String, ContractError> {
        let mut out = String::with_capacity(self.inner.path.len());
        for segment in &self.inner.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = url_params
                        .get(name)
                        .and_then(placeholder_text)
                        .ok_or_else(|| ContractError::UnresolvedPlaceholder {
                            operation: self.identity(),
                            name: name.clone(),
                        })?;
                    out.push_str(&urlencoding::encode(&value));
                }
            }
        }
        Ok(out)
    }

    /// Field errors for the request shape only (used by form binding).
    pub fn validate_request(&self, payload: &Value) -> Result<Value, ValidationErrors> {
        self.inner.request.validate(payload)
    }
}

/// Type-safe contract builder.
///
/// Generic parameters:
/// - `A`: access rule state (Missing | Present)
/// - `R`: response shape state (Missing | Present)
pub struct ContractBuilder<A = Missing, R = Missing> {
    method: Method,
    path: String,
    request: Option<SchemaRef>,
    response: Option<SchemaRef>,
    url_params: Option<SchemaRef>,
    roles: Vec<Role>,
    summary: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
    field_docs: BTreeMap<String, String>,
    request_example: Option<Value>,
    response_example: Option<Value>,
    error_codes: BTreeMap<u16, String>,
    cache: CacheHints,
    // First schema compilation failure, reported by `build()`
    deferred: Option<SchemaError>,
    _access: PhantomData<A>,
    _response: PhantomData<R>,
}

impl ContractBuilder<Missing, Missing> {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            request: None,
            response: None,
            url_params: None,
            roles: Vec::new(),
            summary: None,
            description: None,
            tags: Vec::new(),
            field_docs: BTreeMap::new(),
            request_example: None,
            response_example: None,
            error_codes: BTreeMap::new(),
            cache: CacheHints::default(),
            deferred: None,
            _access: PhantomData,
            _response: PhantomData,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }
}

// Descriptive methods, available at any stage
impl<A, R> ContractBuilder<A, R> {
    fn transition<A2, R2>(self) -> ContractBuilder<A2, R2> {
        ContractBuilder {
            method: self.method,
            path: self.path,
            request: self.request,
            response: self.response,
            url_params: self.url_params,
            roles: self.roles,
            summary: self.summary,
            description: self.description,
            tags: self.tags,
            field_docs: self.field_docs,
            request_example: self.request_example,
            response_example: self.response_example,
            error_codes: self.error_codes,
            cache: self.cache,
            deferred: self.deferred,
            _access: PhantomData,
            _response: PhantomData,
        }
    }

    fn typed<T>(&mut self) -> Option<SchemaRef>
    where
        T: ToSchema + Serialize + DeserializeOwned + 'static,
    {
        match TypedSchema::<T>::new() {
            Ok(schema) => Some(Arc::new(schema)),
            Err(e) => {
                self.deferred.get_or_insert(e);
                None
            }
        }
    }

    pub fn summary(mut self, text: impl Into<String>) -> Self {
        self.summary = Some(text.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Human-readable documentation for one field (`menuItemId`, `url.itemId`).
    pub fn field_doc(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.field_docs.insert(path.into(), text.into());
        self
    }

    pub fn request_example(mut self, example: Value) -> Self {
        self.request_example = Some(example);
        self
    }

    pub fn response_example(mut self, example: Value) -> Self {
        self.response_example = Some(example);
        self
    }

    /// Document an error code this operation may return.
    pub fn error_code(mut self, code: u16, description: impl Into<String>) -> Self {
        self.error_codes.insert(code, description.into());
        self
    }

    pub fn stale_time(mut self, ttl: Duration) -> Self {
        self.cache.stale_time = Some(ttl);
        self
    }

    pub fn cache_time(mut self, ttl: Duration) -> Self {
        self.cache.cache_time = Some(ttl);
        self
    }

    pub fn request(mut self, schema: SchemaRef) -> Self {
        self.request = Some(schema);
        self
    }

    /// Request shape derived from a DTO.
    pub fn request_typed<T>(mut self) -> Self
    where
        T: ToSchema + Serialize + DeserializeOwned + 'static,
    {
        self.request = self.typed::<T>();
        self
    }

    pub fn url_params(mut self, schema: SchemaRef) -> Self {
        self.url_params = Some(schema);
        self
    }

    /// URL-parameter shape derived from a DTO.
    pub fn url_params_typed<T>(mut self) -> Self
    where
        T: ToSchema + Serialize + DeserializeOwned + 'static,
    {
        self.url_params = self.typed::<T>();
        self
    }

    /// Grant access to `role`; may be repeated.
    pub fn allow(mut self, role: impl Into<Role>) -> ContractBuilder<Present, R> {
        let role = role.into();
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self.transition()
    }

    /// Open the operation to unauthenticated callers.
    pub fn public(self) -> ContractBuilder<Present, R> {
        self.allow(Role::PUBLIC)
    }
}

// Response shape: Missing -> Present
impl<A> ContractBuilder<A, Missing> {
    pub fn response(mut self, schema: SchemaRef) -> ContractBuilder<A, Present> {
        self.response = Some(schema);
        self.transition()
    }

    pub fn response_typed<T>(mut self) -> ContractBuilder<A, Present>
    where
        T: ToSchema + Serialize + DeserializeOwned + 'static,
    {
        self.response = self.typed::<T>();
        self.transition()
    }

    /// Response that is a JSON array of `T`.
    pub fn response_list<T>(mut self) -> ContractBuilder<A, Present>
    where
        T: ToSchema,
    {
        self.response = match schema::list_of::<T>() {
            Ok(schema) => Some(Arc::new(schema)),
            Err(e) => {
                self.deferred.get_or_insert(e);
                None
            }
        };
        self.transition()
    }

    /// Free-form response (no structural checks).
    pub fn response_any(mut self, name: &'static str) -> ContractBuilder<A, Present> {
        self.response = Some(Arc::new(AnySchema::named(name)));
        self.transition()
    }
}

impl ContractBuilder<Present, Present> {
    pub fn build(self) -> Result<Contract, ContractError> {
        let operation = format!("{} {}", self.method, self.path);
        if let Some(e) = self.deferred {
            return Err(ContractError::Schema(e));
        }
        let segments = parse_template(&self.path).map_err(|reason| ContractError::Template {
            operation: operation.clone(),
            reason,
        })?;

        let empty: SchemaRef = Arc::new(EmptySchema::default());
        let url_params = self.url_params.unwrap_or_else(|| empty.clone());

        // A URL shape with declared properties must cover every placeholder
        if url_params.document().get("properties").is_some() {
            let declared = url_params.properties();
            for segment in &segments {
                if let Segment::Placeholder(name) = segment {
                    if !declared.iter().any(|p| &p.name == name) {
                        return Err(ContractError::Template {
                            operation,
                            reason: format!("placeholder '{{{name}}}' is not a declared URL parameter"),
                        });
                    }
                }
            }
        }

        let operation_id = format!(
            "{}{}",
            self.method.as_str().to_lowercase(),
            self.path.replace(['/', '{', '}', '-'], "_").trim_end_matches('_')
        );

        Ok(Contract {
            inner: Arc::new(ContractInner {
                method: self.method,
                path: self.path,
                segments,
                operation_id,
                request: self.request.unwrap_or(empty),
                response: self
                    .response
                    .unwrap_or_else(|| Arc::new(AnySchema::named("Any"))),
                url_params,
                roles: self.roles,
                summary: self.summary,
                description: self.description,
                tags: self.tags,
                field_docs: self.field_docs,
                request_example: self.request_example,
                response_example: self.response_example,
                error_codes: self.error_codes,
                cache: self.cache,
            }),
        })
    }
}

/// Convenience for collecting per-field messages by path.
pub fn errors_by_path(errors: &ValidationErrors) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for FieldError { path, message } in errors.iter().cloned() {
        out.entry(path).or_insert(message);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    #[serde(rename_all = "camelCase")]
    struct AddItem {
        menu_item_id: String,
        quantity: u32,
    }

    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    #[serde(rename_all = "camelCase")]
    struct ItemPath {
        item_id: String,
    }

    fn list_params() -> SchemaRef {
        Arc::new(
            JsonSchema::new(
                "ListCart",
                json!({
                    "type": "object",
                    "properties": { "limit": { "type": "integer" }, "q": { "type": "string" } }
                }),
            )
            .unwrap(),
        )
    }

    #[test]
    fn public_contract_does_not_require_authentication() {
        let c = ContractBuilder::get("/v1/menu")
            .public()
            .response_any("Menu")
            .build()
            .unwrap();
        assert!(!c.requires_authentication());
        assert!(c.allows(&Identity::new("anyone", [])));
    }

    #[test]
    fn allows_checks_role_intersection() {
        let c = ContractBuilder::get("/v1/admin/orders")
            .allow("ADMIN")
            .allow("SUPPORT")
            .response_any("Orders")
            .build()
            .unwrap();
        assert!(c.requires_authentication());
        assert!(c.allows(&Identity::new("a", [Role::new("ADMIN")])));
        assert!(!c.allows(&Identity::new("c", [Role::new("CUSTOMER")])));
        assert_eq!(c.identity(), "GET /v1/admin/orders");
    }

    #[test]
    fn read_request_goes_to_query_string() {
        let c = ContractBuilder::get("/v1/cart")
            .allow("CUSTOMER")
            .request(list_params())
            .response_any("Cart")
            .build()
            .unwrap();
        let built = c.build_request(&json!({ "limit": 5, "q": "ramen" }), &Value::Null).unwrap();
        assert_eq!(built.url, "/v1/cart?limit=5&q=ramen");
        assert_eq!(built.body, None);

        let bare = c.build_request(&json!({}), &Value::Null).unwrap();
        assert_eq!(bare.url, "/v1/cart");
    }

    #[test]
    fn write_request_substitutes_encoded_placeholders() {
        let c = ContractBuilder::put("/v1/cart/{itemId}")
            .allow("CUSTOMER")
            .request_typed::<AddItem>()
            .url_params_typed::<ItemPath>()
            .response_any("Cart")
            .build()
            .unwrap();
        assert_eq!(c.placeholders(), vec!["itemId"]);

        let built = c
            .build_request(
                &json!({ "menuItemId": "m1", "quantity": 2 }),
                &json!({ "itemId": "a b/c" }),
            )
            .unwrap();
        assert_eq!(built.url, "/v1/cart/a%20b%2Fc");
        assert_eq!(built.body, Some(json!({ "menuItemId": "m1", "quantity": 2 })));
    }

    #[test]
    fn validation_collects_body_and_url_errors() {
        let c = ContractBuilder::put("/v1/cart/{itemId}")
            .allow("CUSTOMER")
            .request_typed::<AddItem>()
            .url_params_typed::<ItemPath>()
            .response_any("Cart")
            .build()
            .unwrap();

        let err = c.build_request(&json!({ "quantity": 1 }), &json!({})).unwrap_err();
        assert!(!err.is_fatal());
        let errors = err.validation_errors().unwrap();
        assert_eq!(errors.get("menuItemId"), Some("is required"));
        assert_eq!(errors.get("url.itemId"), Some("is required"));
    }

    #[test]
    fn unresolved_placeholder_is_fatal() {
        let c = ContractBuilder::delete("/v1/cart/{itemId}")
            .allow("CUSTOMER")
            .url_params(Arc::new(AnySchema::named("Loose")))
            .response_any("Cart")
            .build()
            .unwrap();
        let err = c.build_request(&Value::Null, &json!({})).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, ContractError::UnresolvedPlaceholder { ref name, .. } if name == "itemId"));
    }

    #[test]
    fn undeclared_placeholder_is_rejected_at_build() {
        let err = ContractBuilder::delete("/v1/cart/{itemId}")
            .allow("CUSTOMER")
            .response_any("Cart")
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractError::Template { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert!(parse_template("v1/cart").is_err());
        assert!(parse_template("/v1/{cart").is_err());
        assert!(parse_template("/v1/cart}").is_err());
        assert_eq!(
            parse_template("/v1/{a}/x").unwrap(),
            vec![
                Segment::Literal("/v1/".into()),
                Segment::Placeholder("a".into()),
                Segment::Literal("/x".into()),
            ]
        );
    }

    #[test]
    fn metadata_is_kept() {
        let c = ContractBuilder::post("/v1/cart")
            .summary("Add an item")
            .tag("cart")
            .field_doc("menuItemId", "Menu item to add")
            .error_code(409, "item unavailable")
            .stale_time(Duration::from_secs(30))
            .allow("CUSTOMER")
            .response_any("Cart")
            .build()
            .unwrap();
        assert_eq!(c.summary(), Some("Add an item"));
        assert_eq!(c.error_codes().get(&409).map(String::as_str), Some("item unavailable"));
        assert_eq!(c.cache_hints().stale_time, Some(Duration::from_secs(30)));
        assert_eq!(c.operation_id(), "post_v1_cart");
        assert_eq!(c.field_docs().len(), 1);
    }
}

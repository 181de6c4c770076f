//! Runtime shape validation.
//!
//! A [`Schema`] validates a JSON value and returns either the parsed (normalised)
//! value or every offending field. The same schema object backs server-side
//! request validation, client-side request building and form field validation,
//! so there is exactly one description of each payload shape.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Shared, type-erased schema handle.
pub type SchemaRef = Arc<dyn Schema>;

/// One offending value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldError {
    /// Dot-separated path (`items.0.menuItemId`); empty for the root value.
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn root(message: impl Into<String>) -> Self {
        Self::new("", message)
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Re-root this error under `prefix` (used to tell URL errors from body errors).
    pub fn prefixed(mut self, prefix: &str) -> Self {
        self.path = if self.path.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}.{}", self.path)
        };
        self
    }
}

/// Ordered list of field errors produced by a single validation pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", summarize(.errors))]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| {
            if e.path.is_empty() {
                e.message.clone()
            } else {
                format!("{}: {}", e.path, e.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vec![FieldError::new(path, message)])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// First message recorded for `path`.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.message.as_str())
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    pub fn into_vec(self) -> Vec<FieldError> {
        self.errors
    }
}

impl From<Vec<FieldError>> for ValidationErrors {
    fn from(errors: Vec<FieldError>) -> Self {
        Self::new(errors)
    }
}

/// Failure to compile a schema document.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid schema '{name}': {message}")]
pub struct SchemaError {
    pub name: String,
    pub message: String,
}

/// JSON type declared for a top-level property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array(Box<PropertyType>),
    Any,
}

impl PropertyType {
    /// Read the `type` keyword of a schema fragment; `["integer", "null"]` yields `Integer`.
    pub fn of(fragment: &Value) -> Self {
        let declared = match fragment.get("type") {
            Some(Value::String(s)) => Some(s.as_str()),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .find(|t| *t != "null"),
            _ => None,
        };
        match declared {
            Some("string") => PropertyType::String,
            Some("integer") => PropertyType::Integer,
            Some("number") => PropertyType::Number,
            Some("boolean") => PropertyType::Boolean,
            Some("object") => PropertyType::Object,
            Some("array") => PropertyType::Array(Box::new(
                fragment.get("items").map(PropertyType::of).unwrap_or(PropertyType::Any),
            )),
            _ if fragment.get("$ref").is_some() => PropertyType::Object,
            _ => PropertyType::Any,
        }
    }

    /// OpenAPI parameter type name.
    pub fn openapi_name(&self) -> &'static str {
        match self {
            PropertyType::String | PropertyType::Any => "string",
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Object => "object",
            PropertyType::Array(_) => "array",
        }
    }
}

/// Top-level property as declared by a schema document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySpec {
    pub name: String,
    pub kind: PropertyType,
    pub required: bool,
    pub description: Option<String>,
}

/// A validator for one payload shape.
pub trait Schema: Send + Sync {
    /// Component name (used for OpenAPI `$ref`s and log fields).
    fn name(&self) -> &str;

    /// JSON Schema document describing the shape.
    fn document(&self) -> &Value;

    /// Validate `value`; on success return the parsed value.
    fn validate(&self, value: &Value) -> Result<Value, ValidationErrors>;

    /// Top-level properties, in declaration order.
    fn properties(&self) -> Vec<PropertySpec> {
        top_level_properties(self.document())
    }

    fn property_type(&self, property: &str) -> PropertyType {
        self.document()
            .get("properties")
            .and_then(|p| p.get(property))
            .map(PropertyType::of)
            .unwrap_or(PropertyType::Any)
    }
}

/// List the top-level properties of a schema document.
pub fn top_level_properties(document: &Value) -> Vec<PropertySpec> {
    let required: Vec<&str> = document
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    document
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, fragment)| PropertySpec {
                    name: name.clone(),
                    kind: PropertyType::of(fragment),
                    required: required.contains(&name.as_str()),
                    description: fragment
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Convert a JSON pointer (`/items/0/menuItemId`) into a dotted path.
pub fn pointer_to_path(pointer: &str) -> String {
    pointer
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect::<Vec<_>>()
        .join(".")
}

fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}

/// Schema compiled from a raw JSON Schema document.
#[derive(Debug)]
pub struct JsonSchema {
    name: String,
    document: Value,
    validator: jsonschema::Validator,
}

impl JsonSchema {
    pub fn new(name: impl Into<String>, document: Value) -> Result<Self, SchemaError> {
        let name = name.into();
        let validator = jsonschema::options()
            .build(&document)
            .map_err(|e| SchemaError {
                name: name.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            name,
            document,
            validator,
        })
    }

    fn check(&self, value: &Value) -> Result<(), ValidationErrors> {
        let errors: Vec<FieldError> = self
            .validator
            .iter_errors(value)
            .map(|error| {
                let path = pointer_to_path(&error.instance_path.to_string());
                match &error.kind {
                    ValidationErrorKind::Required { property } => {
                        let field = property
                            .as_str()
                            .map(str::to_owned)
                            .unwrap_or_else(|| property.to_string());
                        FieldError::new(join_path(&path, &field), "is required")
                    }
                    ValidationErrorKind::AdditionalProperties { unexpected } => FieldError::new(
                        path,
                        format!("unexpected field(s): {}", unexpected.join(", ")),
                    ),
                    _ => FieldError::new(path, error.to_string()),
                }
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors::new(errors))
        }
    }
}

impl Schema for JsonSchema {
    fn name(&self) -> &str {
        &self.name
    }

    fn document(&self) -> &Value {
        &self.document
    }

    fn validate(&self, value: &Value) -> Result<Value, ValidationErrors> {
        self.check(value)?;
        Ok(value.clone())
    }
}

/// Schema derived from a Rust DTO.
///
/// The JSON Schema comes from `utoipa` (referenced components are embedded so
/// `$ref`s resolve inside the document). A value that passes structural
/// validation is deserialised into `T` and serialised back, so serde defaults
/// and renames are reflected in the parsed value.
pub struct TypedSchema<T> {
    inner: JsonSchema,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T>
where
    T: ToSchema + Serialize + DeserializeOwned + 'static,
{
    pub fn new() -> Result<Self, SchemaError> {
        let name = T::name().into_owned();
        let document = typed_document::<T>().map_err(|message| SchemaError {
            name: name.clone(),
            message,
        })?;
        Ok(Self {
            inner: JsonSchema::new(name, document)?,
            _marker: PhantomData,
        })
    }
}

fn typed_document<T: ToSchema>() -> Result<Value, String> {
    let mut document = serde_json::to_value(T::schema()).map_err(|e| e.to_string())?;

    let mut dependencies = Vec::new();
    T::schemas(&mut dependencies);
    if !dependencies.is_empty() {
        let mut defs = Map::new();
        for (name, schema) in dependencies {
            defs.insert(name, serde_json::to_value(schema).map_err(|e| e.to_string())?);
        }
        if let Value::Object(root) = &mut document {
            root.insert(
                "components".to_string(),
                serde_json::json!({ "schemas": Value::Object(defs) }),
            );
        }
    }
    Ok(document)
}

/// Array of `T` items, e.g. a list response.
pub fn list_of<T>() -> Result<JsonSchema, SchemaError>
where
    T: ToSchema,
{
    let name = format!("{}List", T::name());
    let mut item = typed_document::<T>().map_err(|message| SchemaError {
        name: name.clone(),
        message,
    })?;
    let components = item.as_object_mut().and_then(|root| root.remove("components"));

    let mut document = serde_json::json!({ "type": "array", "items": item });
    if let (Some(components), Value::Object(root)) = (components, &mut document) {
        root.insert("components".to_string(), components);
    }
    JsonSchema::new(name, document)
}

impl<T> Schema for TypedSchema<T>
where
    T: ToSchema + Serialize + DeserializeOwned + 'static,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn document(&self) -> &Value {
        self.inner.document()
    }

    fn validate(&self, value: &Value) -> Result<Value, ValidationErrors> {
        self.inner.check(value)?;
        let parsed: T = serde_json::from_value(value.clone())
            .map_err(|e| ValidationErrors::single("", e.to_string()))?;
        serde_json::to_value(&parsed).map_err(|e| ValidationErrors::single("", e.to_string()))
    }
}

/// Shape of operations that take no input: accepts `null` or `{}` and yields `{}`.
#[derive(Debug)]
pub struct EmptySchema {
    document: Value,
}

impl Default for EmptySchema {
    fn default() -> Self {
        Self {
            document: serde_json::json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

impl Schema for EmptySchema {
    fn name(&self) -> &str {
        "Empty"
    }

    fn document(&self) -> &Value {
        &self.document
    }

    fn validate(&self, value: &Value) -> Result<Value, ValidationErrors> {
        match value {
            Value::Null => Ok(Value::Object(Map::new())),
            Value::Object(map) if map.is_empty() => Ok(Value::Object(Map::new())),
            Value::Object(map) => Err(ValidationErrors::new(
                map.keys()
                    .map(|k| FieldError::new(k.clone(), "unexpected field"))
                    .collect(),
            )),
            _ => Err(ValidationErrors::single("", "expected an empty object")),
        }
    }
}

/// Shape that accepts any JSON value unchanged.
#[derive(Debug)]
pub struct AnySchema {
    name: Cow<'static, str>,
    document: Value,
}

impl AnySchema {
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            document: serde_json::json!({}),
        }
    }
}

impl Schema for AnySchema {
    fn name(&self) -> &str {
        &self.name
    }

    fn document(&self) -> &Value {
        &self.document
    }

    fn validate(&self, value: &Value) -> Result<Value, ValidationErrors> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    #[serde(rename_all = "camelCase")]
    struct AddItem {
        menu_item_id: String,
        #[serde(default = "one")]
        quantity: u32,
        note: Option<String>,
    }

    fn one() -> u32 {
        1
    }

    #[test]
    fn typed_schema_reports_missing_field_at_its_own_path() {
        let schema = TypedSchema::<AddItem>::new().expect("schema");
        let err = schema.validate(&json!({ "quantity": 2 })).unwrap_err();
        assert_eq!(err.get("menuItemId"), Some("is required"));
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn typed_schema_applies_serde_defaults() {
        let schema = TypedSchema::<AddItem>::new().expect("schema");
        let parsed = schema.validate(&json!({ "menuItemId": "m-1" })).unwrap();
        assert_eq!(parsed["quantity"], json!(1));
        assert_eq!(parsed["menuItemId"], json!("m-1"));
    }

    #[test]
    fn typed_schema_reports_type_mismatch_path() {
        let schema = TypedSchema::<AddItem>::new().expect("schema");
        let err = schema
            .validate(&json!({ "menuItemId": 5, "quantity": "x" }))
            .unwrap_err();
        assert!(err.get("menuItemId").is_some());
        assert!(err.get("quantity").is_some());
    }

    #[test]
    fn property_types_are_read_from_document() {
        let schema = TypedSchema::<AddItem>::new().expect("schema");
        assert_eq!(schema.property_type("quantity"), PropertyType::Integer);
        assert_eq!(schema.property_type("note"), PropertyType::String);
        assert_eq!(schema.property_type("missing"), PropertyType::Any);

        let props = schema.properties();
        let id = props.iter().find(|p| p.name == "menuItemId").unwrap();
        assert!(id.required);
    }

    #[test]
    fn json_schema_nested_pointer_becomes_dotted_path() {
        let schema = JsonSchema::new(
            "Order",
            json!({
                "type": "object",
                "properties": {
                    "items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["id"],
                            "properties": { "id": { "type": "string" } }
                        }
                    }
                }
            }),
        )
        .unwrap();

        let err = schema.validate(&json!({ "items": [{ "id": "a" }, {}] })).unwrap_err();
        assert_eq!(err.get("items.1.id"), Some("is required"));
    }

    #[test]
    fn list_schema_reports_item_paths() {
        let schema = list_of::<AddItem>().expect("schema");
        assert_eq!(schema.name(), "AddItemList");
        assert!(schema.validate(&json!([])).is_ok());
        let err = schema
            .validate(&json!([{ "menuItemId": "a" }, { "quantity": 1 }]))
            .unwrap_err();
        assert_eq!(err.get("1.menuItemId"), Some("is required"));
    }

    #[test]
    fn empty_schema_accepts_null_and_rejects_fields() {
        let schema = EmptySchema::default();
        assert_eq!(schema.validate(&Value::Null).unwrap(), json!({}));
        let err = schema.validate(&json!({ "x": 1 })).unwrap_err();
        assert_eq!(err.get("x"), Some("unexpected field"));
    }

    #[test]
    fn pointer_conversion() {
        assert_eq!(pointer_to_path(""), "");
        assert_eq!(pointer_to_path("/a/0/b"), "a.0.b");
        assert_eq!(pointer_to_path("/a~1b"), "a/b");
    }
}

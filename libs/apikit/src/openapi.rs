//! OpenAPI document emitted from registered contracts.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};
use utoipa::openapi::{
    content::ContentBuilder,
    info::InfoBuilder,
    path::{
        HttpMethod, OperationBuilder as UOperationBuilder, ParameterBuilder, ParameterIn,
        PathItemBuilder, PathsBuilder,
    },
    request_body::RequestBodyBuilder,
    response::{ResponseBuilder, ResponsesBuilder},
    schema::{ComponentsBuilder, ObjectBuilder, Schema, SchemaType, Type},
    security::{HttpAuthScheme, HttpBuilder, SecurityRequirement, SecurityScheme},
    OpenApi, OpenApiBuilder, Ref, RefOr, Required,
};
use utoipa::{PartialSchema, ToSchema};

use crate::contract::Contract;
use crate::envelope::ApiFailure;
use crate::schema::{PropertySpec, PropertyType, Schema as PayloadSchema};

const FAILURE_ENVELOPE: &str = "FailureEnvelope";

/// Collects component schemas, skipping names already present.
#[derive(Default)]
struct Components {
    schemas: BTreeMap<String, RefOr<Schema>>,
    skipped: BTreeSet<String>,
}

impl Components {
    fn insert_document(&mut self, name: &str, document: &Value) -> bool {
        if self.schemas.contains_key(name) {
            return true;
        }
        if self.skipped.contains(name) || is_free_form(document) {
            return false;
        }

        let mut document = document.clone();
        let nested = document
            .as_object_mut()
            .and_then(|root| root.remove("components"))
            .and_then(|c| c.get("schemas").cloned());
        if let Some(Value::Object(nested)) = nested {
            for (dep, doc) in nested {
                self.insert_document(&dep, &doc);
            }
        }

        match serde_json::from_value::<RefOr<Schema>>(document) {
            Ok(schema) => {
                self.schemas.insert(name.to_string(), schema);
                true
            }
            Err(e) => {
                tracing::warn!(%name, error = %e, "Schema not representable in OpenAPI; documenting as free-form");
                self.skipped.insert(name.to_string());
                false
            }
        }
    }

    fn insert_payload(&mut self, schema: &dyn PayloadSchema) -> Option<String> {
        self.insert_document(schema.name(), schema.document())
            .then(|| schema.name().to_string())
    }
}

fn is_free_form(document: &Value) -> bool {
    document.as_object().map_or(true, |m| m.is_empty())
}

fn failure_envelope_document() -> Value {
    let mut document = serde_json::to_value(<ApiFailure as PartialSchema>::schema()).unwrap_or_default();
    if let Some(root) = document.as_object_mut() {
        if let Some(Value::Object(props)) = root.get_mut("properties") {
            props.insert("success".to_string(), json!({ "type": "boolean", "enum": [false] }));
        }
        if let Some(Value::Array(required)) = root.get_mut("required") {
            required.push(json!("success"));
        }
    }
    document
}

fn any_value() -> RefOr<Schema> {
    RefOr::T(Schema::Object(
        ObjectBuilder::new().schema_type(SchemaType::AnyValue).build(),
    ))
}

fn component_ref(name: Option<&str>) -> RefOr<Schema> {
    match name {
        Some(name) => RefOr::Ref(Ref::from_schema_name(name)),
        None => any_value(),
    }
}

fn success_envelope(data: RefOr<Schema>) -> RefOr<Schema> {
    RefOr::T(Schema::Object(
        ObjectBuilder::new()
            .property(
                "success",
                ObjectBuilder::new().schema_type(SchemaType::Type(Type::Boolean)),
            )
            .required("success")
            .property("data", data)
            .build(),
    ))
}

fn parameter_type(kind: &PropertyType) -> Type {
    match kind {
        PropertyType::Integer => Type::Integer,
        PropertyType::Number => Type::Number,
        PropertyType::Boolean => Type::Boolean,
        PropertyType::Array(_) => Type::Array,
        PropertyType::Object => Type::Object,
        PropertyType::String | PropertyType::Any => Type::String,
    }
}

fn parameter(
    contract: &Contract,
    prop: &PropertySpec,
    location: ParameterIn,
    doc_key: String,
) -> utoipa::openapi::path::Parameter {
    let required = matches!(location, ParameterIn::Path) || prop.required;
    let description = contract
        .field_docs()
        .get(&doc_key)
        .or_else(|| contract.field_docs().get(&prop.name))
        .cloned()
        .or_else(|| prop.description.clone());
    let schema = Schema::Object(
        ObjectBuilder::new()
            .schema_type(SchemaType::Type(parameter_type(&prop.kind)))
            .build(),
    );
    ParameterBuilder::new()
        .name(&prop.name)
        .parameter_in(location)
        .required(if required { Required::True } else { Required::False })
        .description(description)
        .schema(Some(schema))
        .build()
}

/// Error codes documented for `contract`: pipeline-generated ones first, then
/// the contract's own descriptions (which take precedence).
fn error_responses(contract: &Contract) -> BTreeMap<u16, String> {
    let mut codes = BTreeMap::new();
    let has_input = !contract.request().properties().is_empty()
        || !contract.url_params().properties().is_empty();
    if has_input || !contract.is_read() {
        codes.insert(400, "Validation failed".to_string());
    }
    if contract.requires_authentication() {
        codes.insert(401, "Not authenticated".to_string());
        codes.insert(403, "Not authorized".to_string());
    }
    codes.insert(500, "Handler failure or response shape violation".to_string());
    for (code, description) in contract.error_codes() {
        codes.insert(*code, description.clone());
    }
    codes
}

fn http_method(contract: &Contract) -> HttpMethod {
    match contract.method().as_str() {
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        "PATCH" => HttpMethod::Patch,
        "HEAD" => HttpMethod::Head,
        _ => HttpMethod::Get,
    }
}

/// Build the document for `contracts`.
pub fn build_openapi(contracts: &[Contract], title: &str, version: &str) -> OpenApi {
    let mut components = Components::default();
    let mut dependencies = Vec::new();
    <ApiFailure as ToSchema>::schemas(&mut dependencies);
    for (name, schema) in dependencies {
        if let Ok(doc) = serde_json::to_value(schema) {
            components.insert_document(&name, &doc);
        }
    }
    components.insert_document(FAILURE_ENVELOPE, &failure_envelope_document());

    let mut paths = PathsBuilder::new();
    for contract in contracts {
        let mut op = UOperationBuilder::new()
            .operation_id(Some(contract.operation_id()))
            .summary(contract.summary())
            .description(contract.description());
        for tag in contract.tags() {
            op = op.tag(tag.clone());
        }

        let placeholders = contract.placeholders();
        for prop in contract.url_params().properties() {
            if placeholders.contains(&prop.name.as_str()) {
                let key = format!("url.{}", prop.name);
                op = op.parameter(parameter(contract, &prop, ParameterIn::Path, key));
            }
        }

        if contract.is_read() {
            for prop in contract.request().properties() {
                let key = prop.name.clone();
                op = op.parameter(parameter(contract, &prop, ParameterIn::Query, key));
            }
        } else if contract.request().name() != "Empty" {
            let name = components.insert_payload(contract.request().as_ref());
            let content = ContentBuilder::new()
                .schema(Some(component_ref(name.as_deref())))
                .example(contract.request_example().cloned())
                .build();
            let body = RequestBodyBuilder::new()
                .content("application/json", content)
                .required(Some(Required::True))
                .build();
            op = op.request_body(Some(body));
        }

        let response_name = components.insert_payload(contract.response().as_ref());
        let success = ContentBuilder::new()
            .schema(Some(success_envelope(component_ref(response_name.as_deref()))))
            .example(
                contract
                    .response_example()
                    .map(|data| json!({ "success": true, "data": data })),
            )
            .build();
        let mut responses = ResponsesBuilder::new().response(
            "200",
            ResponseBuilder::new()
                .description("Success envelope")
                .content("application/json", success)
                .build(),
        );
        for (code, description) in error_responses(contract) {
            let content = ContentBuilder::new()
                .schema(Some(RefOr::Ref(Ref::from_schema_name(FAILURE_ENVELOPE))))
                .build();
            responses = responses.response(
                code.to_string(),
                ResponseBuilder::new()
                    .description(description)
                    .content("application/json", content)
                    .build(),
            );
        }
        op = op.responses(responses.build());

        if contract.requires_authentication() {
            op = op.security(SecurityRequirement::new("bearerAuth", Vec::<String>::new()));
        }

        let item = PathItemBuilder::new()
            .operation(http_method(contract), op.build())
            .build();
        paths = paths.path(contract.path(), item);
    }

    let mut builder = ComponentsBuilder::new();
    for (name, schema) in components.schemas {
        builder = builder.schema(name, schema);
    }
    builder = builder.security_scheme(
        "bearerAuth",
        SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
    );

    let info = InfoBuilder::new().title(title).version(version).build();

    OpenApiBuilder::new()
        .info(info)
        .paths(paths.build())
        .components(Some(builder.build()))
        .build()
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use apikit::prelude::*;
use apikit::{
    ApiFailure, ApiHost, HandlerRequest, HostConfig, Pipeline, RawRequest, Stage,
    StaticIdentityProvider,
};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceExt;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct AddItem {
    menu_item_id: String,
    quantity: u32,
    note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CartLine {
    menu_item_id: String,
    quantity: u32,
}

/// Records how often it ran and answers with a fixed value.
struct Spy {
    calls: AtomicUsize,
    reply: Value,
}

impl Spy {
    fn new(reply: Value) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EndpointHandler for Spy {
    async fn handle(&self, _request: HandlerRequest) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

struct Boom;

#[async_trait]
impl EndpointHandler for Boom {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, HandlerError> {
        if request.data.get("explode").is_some() {
            panic!("boom");
        }
        Ok(json!([]))
    }
}

fn identities() -> Arc<StaticIdentityProvider> {
    Arc::new(
        StaticIdentityProvider::new()
            .with_token("t-customer", Identity::new("carol", [Role::new("CUSTOMER")]))
            .with_token("t-driver", Identity::new("dave", [Role::new("DRIVER")]))
            .with_token("t-admin", Identity::new("alice", [Role::new("ADMIN")])),
    )
}

fn pipeline() -> Pipeline {
    Pipeline::new(identities())
}

fn add_item_contract() -> Contract {
    ContractBuilder::post("/v1/cart")
        .allow("CUSTOMER")
        .request_typed::<AddItem>()
        .response_list::<CartLine>()
        .build()
        .expect("contract")
}

fn admin_contract() -> Contract {
    ContractBuilder::get("/v1/admin/orders")
        .allow("ADMIN")
        .response_any("Orders")
        .build()
        .expect("contract")
}

fn post(token: &str, body: Value) -> RawRequest {
    RawRequest {
        token: Some(token.to_string()),
        body: Bytes::from(body.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn malformed_payloads_never_reach_handler() {
    let contract = add_item_contract();
    let spy = Spy::new(json!([]));
    let bad_payloads = [
        json!({ "quantity": 1 }),
        json!({ "menuItemId": 7, "quantity": 1 }),
        json!({ "menuItemId": "m-1", "quantity": "two" }),
        json!({ "menuItemId": "m-1", "quantity": 1, "note": 5 }),
        json!([]),
    ];

    for payload in bad_payloads {
        let outcome = pipeline()
            .execute(&contract, spy.as_ref(), post("t-customer", payload.clone()))
            .await;
        let failure = outcome.envelope.failure_ref().expect("failure");
        assert_eq!(failure.error_code, 400, "payload {payload}");
        assert!(!failure.errors.is_empty(), "payload {payload}");
        assert_eq!(outcome.stage, Stage::UrlValidated);
    }
    assert_eq!(spy.calls(), 0);
}

#[tokio::test]
async fn missing_field_error_names_the_field() {
    let outcome = pipeline()
        .execute(
            &add_item_contract(),
            Spy::new(json!([])).as_ref(),
            post("t-customer", json!({ "quantity": 1 })),
        )
        .await;
    let failure = outcome.envelope.failure_ref().unwrap();
    assert!(failure
        .errors
        .iter()
        .any(|e| e.path == "menuItemId" && e.message == "is required"));
}

#[tokio::test]
async fn roles_outside_allow_list_get_403_before_handler() {
    let contract = admin_contract();
    let spy = Spy::new(json!([]));

    for token in ["t-customer", "t-driver"] {
        let outcome = pipeline()
            .execute(
                &contract,
                spy.as_ref(),
                RawRequest {
                    token: Some(token.into()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(outcome.envelope.failure_ref().unwrap().error_code, 403);
    }
    assert_eq!(spy.calls(), 0);

    let outcome = pipeline()
        .execute(
            &contract,
            spy.as_ref(),
            RawRequest {
                token: Some("t-admin".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(outcome.envelope.is_success());
    assert_eq!(spy.calls(), 1);
}

#[tokio::test]
async fn customer_calling_admin_contract_is_forbidden() {
    let spy = Spy::new(json!([]));
    let outcome = pipeline()
        .execute(
            &admin_contract(),
            spy.as_ref(),
            RawRequest {
                token: Some("t-customer".into()),
                ..Default::default()
            },
        )
        .await;

    let wire = serde_json::to_value(&outcome.envelope).unwrap();
    assert_eq!(wire["success"], json!(false));
    assert_eq!(wire["errorCode"], json!(403));
    assert_eq!(wire["message"], json!("not authorized"));
    assert_eq!(spy.calls(), 0);
}

#[tokio::test]
async fn missing_credential_is_401() {
    let outcome = pipeline()
        .execute(&admin_contract(), Spy::new(json!([])).as_ref(), RawRequest::default())
        .await;
    assert_eq!(outcome.envelope.failure_ref().unwrap().error_code, 401);
    assert_eq!(outcome.stage, Stage::Unauthenticated);
}

#[tokio::test]
async fn handler_errors_keep_their_code() {
    struct Unavailable;

    #[async_trait]
    impl EndpointHandler for Unavailable {
        async fn handle(&self, _request: HandlerRequest) -> Result<Value, HandlerError> {
            Err(HandlerError::conflict("item unavailable"))
        }
    }

    let outcome = pipeline()
        .execute(
            &add_item_contract(),
            &Unavailable,
            post("t-customer", json!({ "menuItemId": "m-1", "quantity": 1 })),
        )
        .await;
    let failure = outcome.envelope.failure_ref().unwrap();
    assert_eq!(failure.error_code, 409);
    assert_eq!(failure.message, "item unavailable");
    assert_eq!(failure.operation.as_deref(), Some("POST /v1/cart"));
}

#[tokio::test]
async fn response_shape_violation_is_500() {
    let spy = Spy::new(json!({ "not": "a list" }));
    let outcome = pipeline()
        .execute(
            &add_item_contract(),
            spy.as_ref(),
            post("t-customer", json!({ "menuItemId": "m-1", "quantity": 1 })),
        )
        .await;
    assert_eq!(spy.calls(), 1);
    assert_eq!(outcome.stage, Stage::HandlerExecuted);
    assert_eq!(outcome.envelope.failure_ref().unwrap().error_code, 500);
}

#[tokio::test]
async fn typed_handler_round_trip() {
    let handler = typed_handler(|body: AddItem, _url: Value, identity: Option<Identity>| async move {
        assert_eq!(identity.map(|i| i.subject), Some("carol".to_string()));
        Ok::<_, HandlerError>(vec![CartLine {
            menu_item_id: body.menu_item_id,
            quantity: body.quantity,
        }])
    });

    let outcome = pipeline()
        .execute(
            &add_item_contract(),
            &handler,
            post("t-customer", json!({ "menuItemId": "m-9", "quantity": 3 })),
        )
        .await;
    assert_eq!(outcome.stage, Stage::Sent);
    assert_eq!(
        outcome.envelope,
        Envelope::success(json!([{ "menuItemId": "m-9", "quantity": 3 }]))
    );
}

fn host() -> ApiHost {
    ApiHost::new(HostConfig::default(), identities())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn panicking_handler_returns_500_and_host_keeps_serving() {
    let host = host();
    let contract = ContractBuilder::post("/v1/boom")
        .public()
        .request(Arc::new(apikit::AnySchema::named("Any")))
        .response_any("Any")
        .build()
        .unwrap();
    assert!(host.register(contract, Arc::new(Boom)));
    let router = host.build_router();

    let response = router
        .clone()
        .oneshot(
            Request::post("/v1/boom")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"explode":true}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["message"], json!("boom"));
    assert_eq!(body["errorCode"], json!(500));

    let response = router
        .oneshot(
            Request::post("/v1/boom")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "success": true, "data": [] }));
}

#[tokio::test]
async fn router_enforces_roles_over_http() {
    let host = host();
    let spy = Spy::new(json!([]));
    host.register(admin_contract(), spy.clone());
    let router = host.build_router();

    let response = router
        .oneshot(
            Request::get("/v1/admin/orders")
                .header(header::AUTHORIZATION, "Bearer t-customer")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().contains_key("x-request-id"));
    let failure: ApiFailure = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(failure.error_code, 403);
    assert_eq!(spy.calls(), 0);
}

#[tokio::test]
async fn duplicate_registration_first_wins() {
    let host = host();
    let first = Spy::new(json!("first"));
    let second = Spy::new(json!("second"));
    assert!(host.register(admin_contract(), first.clone()));
    assert!(!host.register(admin_contract(), second.clone()));
    assert_eq!(host.contracts().len(), 1);

    let response = host
        .build_router()
        .oneshot(
            Request::get("/v1/admin/orders")
                .header(header::AUTHORIZATION, "Bearer t-admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["data"], json!("first"));
    assert_eq!(second.calls(), 0);
}

#[tokio::test]
async fn path_parameters_reach_the_handler() {
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    #[serde(rename_all = "camelCase")]
    struct ItemPath {
        item_id: String,
    }

    let host = host();
    let contract = ContractBuilder::delete("/v1/cart/{itemId}")
        .allow("CUSTOMER")
        .url_params_typed::<ItemPath>()
        .response_any("Removed")
        .build()
        .unwrap();
    let handler = typed_handler(|_: Value, url: ItemPath, _: Option<Identity>| async move {
        Ok::<_, HandlerError>(json!({ "removed": url.item_id }))
    });
    host.register(contract, Arc::new(handler));

    let response = host
        .build_router()
        .oneshot(
            Request::delete("/v1/cart/line%201")
                .header(header::AUTHORIZATION, "Bearer t-customer")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["removed"], json!("line 1"));
}

#[tokio::test]
async fn health_and_openapi_are_served() {
    let host = host();
    host.register(add_item_contract(), Spy::new(json!([])));
    let router = host.build_router();

    let response = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert!(doc["paths"]["/v1/cart"]["post"].is_object());
}

struct Slow;

#[async_trait]
impl EndpointHandler for Slow {
    async fn handle(&self, _request: HandlerRequest) -> Result<Value, HandlerError> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(json!([]))
    }
}

#[tokio::test(start_paused = true)]
async fn slow_handlers_time_out_with_408() {
    let config = HostConfig {
        request_timeout: std::time::Duration::from_millis(100),
        ..HostConfig::default()
    };
    let host = ApiHost::new(config, identities());
    let contract = ContractBuilder::get("/v1/slow")
        .public()
        .response_any("Any")
        .build()
        .unwrap();
    assert!(host.register(contract, Arc::new(Slow)));

    let response = host
        .build_router()
        .oneshot(Request::get("/v1/slow").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
}

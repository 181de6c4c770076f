//! HTTP host: mounts one axum route per contract and serves them through the pipeline.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use axum::body::Bytes;
use axum::extract::{RawPathParams, RawQuery};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::{Json, Router};
use dashmap::DashMap;
use parking_lot::Mutex;
use tower_http::{
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::field::Empty;

use crate::contract::Contract;
use crate::identity::{bearer_token, IdentityProvider};
use crate::openapi;
use crate::pipeline::{EndpointHandler, Pipeline, RawRequest};

mod config;
pub mod request_id;

pub use config::HostConfig;

struct Endpoint {
    pipeline: Pipeline,
    contract: Contract,
    handler: Arc<dyn EndpointHandler>,
}

impl Endpoint {
    async fn serve(
        &self,
        path_params: Vec<(String, String)>,
        headers: HeaderMap,
        query: Option<String>,
        body: Bytes,
    ) -> Response {
        let request = RawRequest {
            token: bearer_token(&headers).map(str::to_owned),
            path_params,
            query,
            body,
        };
        self.pipeline
            .execute(&self.contract, self.handler.as_ref(), request)
            .await
            .envelope
            .into_response()
    }
}

/// Owns the route table, the contract registry and the middleware stack.
pub struct ApiHost {
    pipeline: Pipeline,
    config: ArcSwap<HostConfig>,
    // Duplicate detection per (method, path); first registration wins
    registered_routes: DashMap<(Method, String), ()>,
    contracts: DashMap<String, Contract>,
    routes: Mutex<Router>,
}

impl ApiHost {
    pub fn new(config: HostConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            pipeline: Pipeline::new(identity),
            config: ArcSwap::from_pointee(config),
            registered_routes: DashMap::new(),
            contracts: DashMap::new(),
            routes: Mutex::new(Router::new()),
        }
    }

    pub fn config(&self) -> HostConfig {
        (**self.config.load()).clone()
    }

    pub fn set_config(&self, config: HostConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Registered contracts ordered by path, then method.
    pub fn contracts(&self) -> Vec<Contract> {
        let mut all: Vec<Contract> = self.contracts.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            (a.path(), a.method().as_str()).cmp(&(b.path(), b.method().as_str()))
        });
        all
    }

    /// Mount `handler` behind `contract`. Returns `false` (and logs) when the
    /// `(method, path)` pair is already taken.
    pub fn register(&self, contract: Contract, handler: Arc<dyn EndpointHandler>) -> bool {
        let route_key = (contract.method().clone(), contract.path().to_string());
        if self.registered_routes.insert(route_key, ()).is_some() {
            tracing::error!(
                method = %contract.method(),
                path = %contract.path(),
                "Duplicate (method, path) detected; ignoring subsequent registration"
            );
            return false;
        }

        let endpoint = Arc::new(Endpoint {
            pipeline: self.pipeline.clone(),
            contract: contract.clone(),
            handler,
        });
        let method_router = method_router_for(&contract, endpoint);

        {
            let mut routes = self.routes.lock();
            let current = std::mem::take(&mut *routes);
            *routes = current.route(contract.path(), method_router);
        }

        self.contracts.insert(contract.identity(), contract.clone());
        tracing::debug!(
            operation = %contract,
            public = !contract.requires_authentication(),
            total_operations = self.contracts.len(),
            "Registered API operation"
        );
        true
    }

    /// Build the OpenAPI document for everything registered so far.
    pub fn build_openapi(&self) -> utoipa::openapi::OpenApi {
        let cfg = self.config();
        let contracts = self.contracts();
        tracing::info!("Building OpenAPI: found {} registered operations", contracts.len());
        openapi::build_openapi(&contracts, &cfg.title, &cfg.version)
    }

    /// Final router: registered routes, `/health`, optional docs, middleware stack.
    pub fn build_router(&self) -> Router {
        let config = self.config();
        let mut router = self.routes.lock().clone().route("/health", get(health_check));

        if config.enable_docs {
            let doc = Arc::new(self.build_openapi());
            router = router.route(
                "/openapi.json",
                get(move || {
                    let doc = doc.clone();
                    async move {
                        ([(header::CACHE_CONTROL, "no-store")], Json(doc.as_ref().clone()))
                            .into_response()
                    }
                }),
            );
        }

        apply_middleware_stack(router, &config)
    }

    /// Bind, serve until `shutdown` resolves.
    pub async fn serve<F>(self: Arc<Self>, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP server bound on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }
}

fn method_router_for(contract: &Contract, endpoint: Arc<Endpoint>) -> MethodRouter {
    if contract.placeholders().is_empty() {
        let h = move |headers: HeaderMap, RawQuery(query): RawQuery, body: Bytes| {
            let endpoint = endpoint.clone();
            async move { endpoint.serve(Vec::new(), headers, query, body).await }
        };
        route_by_method(contract.method(), h)
    } else {
        let h = move |params: RawPathParams,
                      headers: HeaderMap,
                      RawQuery(query): RawQuery,
                      body: Bytes| {
            let endpoint = endpoint.clone();
            let path_params = params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>();
            async move { endpoint.serve(path_params, headers, query, body).await }
        };
        route_by_method(contract.method(), h)
    }
}

fn route_by_method<H, T>(method: &Method, h: H) -> MethodRouter
where
    H: axum::handler::Handler<T, ()>,
    T: 'static,
{
    match *method {
        Method::GET => axum::routing::get(h),
        Method::POST => axum::routing::post(h),
        Method::PUT => axum::routing::put(h),
        Method::DELETE => axum::routing::delete(h),
        Method::PATCH => axum::routing::patch(h),
        Method::HEAD => axum::routing::head(h),
        _ => axum::routing::any(|| async { StatusCode::METHOD_NOT_ALLOWED }),
    }
}

async fn health_check() -> impl IntoResponse {
    Json(HashMap::from([("status", "ok")]))
}

/// Request id (set, propagate) -> trace span -> timeout -> body limit -> CORS -> routes
fn apply_middleware_stack(mut router: Router, config: &HostConfig) -> Router {
    let x_request_id = request_id::header();

    if config.cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }
    router = router.layer(RequestBodyLimitLayer::new(config.body_limit_bytes));
    router = router.layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        config.request_timeout,
    ));

    router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &axum::http::Request<axum::body::Body>| {
                let rid = req
                    .headers()
                    .get(request_id::X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("n/a");
                tracing::info_span!(
                    "http_request",
                    method = %req.method(),
                    uri = %req.uri().path(),
                    request_id = %rid,
                    status = Empty,
                    latency_ms = Empty,
                )
            })
            .on_response(
                |res: &axum::http::Response<axum::body::Body>,
                 latency: std::time::Duration,
                 span: &tracing::Span| {
                    span.record("status", res.status().as_u16());
                    span.record("latency_ms", latency.as_millis() as u64);
                },
            ),
    );

    // Outermost: generate the id when missing, then copy it onto the response
    router = router.layer(PropagateRequestIdLayer::new(x_request_id.clone()));
    router.layer(SetRequestIdLayer::new(x_request_id, request_id::MakeReqId))
}

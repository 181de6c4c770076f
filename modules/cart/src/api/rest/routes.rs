use std::sync::Arc;

use apikit::{typed_handler, ApiHost, Contract, EndpointHandler, Identity};
use serde_json::Value;

use crate::api::rest::contracts;
use crate::api::rest::dto::{AddItemRequest, ItemPath, OrdersQuery};
use crate::api::rest::handlers;
use crate::domain::service::CartService;

fn mount(host: &ApiHost, contract: Contract, handler: Arc<dyn EndpointHandler>) -> anyhow::Result<()> {
    let identity = contract.identity();
    if !host.register(contract, handler) {
        anyhow::bail!("operation {identity} is already registered");
    }
    Ok(())
}

/// Mount every cart operation on `host`.
pub fn register_routes(host: &ApiHost, service: Arc<CartService>) -> anyhow::Result<()> {
    // GET /v1/cart
    let svc = service.clone();
    mount(
        host,
        contracts::list_cart()?,
        Arc::new(typed_handler(move |_: Value, _: Value, identity: Option<Identity>| {
            handlers::list_cart(svc.clone(), identity)
        })),
    )?;

    // POST /v1/cart
    let svc = service.clone();
    mount(
        host,
        contracts::add_item()?,
        Arc::new(typed_handler(
            move |body: AddItemRequest, _: Value, identity: Option<Identity>| {
                handlers::add_item(svc.clone(), body, identity)
            },
        )),
    )?;

    // DELETE /v1/cart/{itemId}
    let svc = service.clone();
    mount(
        host,
        contracts::remove_item()?,
        Arc::new(typed_handler(
            move |_: Value, url: ItemPath, identity: Option<Identity>| {
                handlers::remove_item(svc.clone(), url, identity)
            },
        )),
    )?;

    // POST /v1/orders
    let svc = service.clone();
    mount(
        host,
        contracts::checkout()?,
        Arc::new(typed_handler(move |_: Value, _: Value, identity: Option<Identity>| {
            handlers::checkout(svc.clone(), identity)
        })),
    )?;

    // GET /v1/admin/orders
    let svc = service;
    mount(
        host,
        contracts::admin_orders()?,
        Arc::new(typed_handler(move |query: OrdersQuery, _: Value, _: Option<Identity>| {
            handlers::admin_orders(svc.clone(), query)
        })),
    )?;

    Ok(())
}

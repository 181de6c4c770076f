use std::sync::Arc;

use apikit::{HandlerError, Identity};
use tracing::info;

use crate::api::rest::dto::{
    lines_to_dto, AddItemRequest, CartLineDto, ItemPath, OrderDto, OrdersQuery,
};
use crate::domain::service::CartService;

type CartResult<T> = Result<T, HandlerError>;

// Customer contracts are never public, so the pipeline always resolves an identity
fn owner(identity: Option<Identity>) -> CartResult<String> {
    identity
        .map(|i| i.subject)
        .ok_or_else(|| HandlerError::new(401, "not authenticated"))
}

#[tracing::instrument(name = "cart.list", skip_all)]
pub async fn list_cart(svc: Arc<CartService>, identity: Option<Identity>) -> CartResult<Vec<CartLineDto>> {
    let owner = owner(identity)?;
    Ok(lines_to_dto(svc.lines(&owner).await))
}

#[tracing::instrument(
    name = "cart.add_item",
    skip(svc, identity),
    fields(menu_item_id = %body.menu_item_id, quantity = body.quantity)
)]
pub async fn add_item(
    svc: Arc<CartService>,
    body: AddItemRequest,
    identity: Option<Identity>,
) -> CartResult<Vec<CartLineDto>> {
    let owner = owner(identity)?;
    let lines = svc.add(&owner, body.into()).await?;
    Ok(lines_to_dto(lines))
}

#[tracing::instrument(name = "cart.remove_item", skip(svc, identity), fields(item_id = %url.item_id))]
pub async fn remove_item(
    svc: Arc<CartService>,
    url: ItemPath,
    identity: Option<Identity>,
) -> CartResult<Vec<CartLineDto>> {
    let owner = owner(identity)?;
    let lines = svc.remove(&owner, &url.item_id).await?;
    Ok(lines_to_dto(lines))
}

#[tracing::instrument(name = "cart.checkout", skip_all)]
pub async fn checkout(svc: Arc<CartService>, identity: Option<Identity>) -> CartResult<OrderDto> {
    let owner = owner(identity)?;
    let order = svc.checkout(&owner).await?;
    info!(order_id = %order.id, "Checkout complete");
    Ok(order.into())
}

#[tracing::instrument(name = "cart.admin_orders", skip(svc), fields(customer = ?query.customer))]
pub async fn admin_orders(svc: Arc<CartService>, query: OrdersQuery) -> CartResult<Vec<OrderDto>> {
    let orders = svc.orders(query.customer.as_deref()).await;
    Ok(orders.into_iter().map(OrderDto::from).collect())
}

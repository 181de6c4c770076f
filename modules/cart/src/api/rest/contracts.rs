//! Cart operations as contracts. Servers mount them through
//! [`register_routes`](super::routes::register_routes); clients pass the same
//! values to `apikit-client`.

use std::time::Duration;

use apikit::{Contract, ContractBuilder, ContractError};
use serde_json::json;

use crate::api::rest::dto::{AddItemRequest, CartLineDto, ItemPath, OrderDto, OrdersQuery};

pub const TAG: &str = "Cart";
pub const CUSTOMER: &str = "CUSTOMER";
pub const ADMIN: &str = "ADMIN";

/// `GET /v1/cart`
pub fn list_cart() -> Result<Contract, ContractError> {
    ContractBuilder::get("/v1/cart")
        .summary("List the caller's cart")
        .tag(TAG)
        .allow(CUSTOMER)
        .stale_time(Duration::from_secs(30))
        .cache_time(Duration::from_secs(300))
        .response_list::<CartLineDto>()
        .response_example(json!([{ "menuItemId": "m-1", "quantity": 2 }]))
        .build()
}

/// `POST /v1/cart`
pub fn add_item() -> Result<Contract, ContractError> {
    ContractBuilder::post("/v1/cart")
        .summary("Add a menu item to the caller's cart")
        .tag(TAG)
        .allow(CUSTOMER)
        .request_typed::<AddItemRequest>()
        .field_doc("menuItemId", "Identifier of the menu item")
        .field_doc("quantity", "Units to add; summed with any units already in the cart")
        .request_example(json!({ "menuItemId": "m-1", "quantity": 2 }))
        .error_code(409, "Quantity limit reached")
        .response_list::<CartLineDto>()
        .build()
}

/// `DELETE /v1/cart/{itemId}`
pub fn remove_item() -> Result<Contract, ContractError> {
    ContractBuilder::delete("/v1/cart/{itemId}")
        .summary("Remove a menu item from the caller's cart")
        .tag(TAG)
        .allow(CUSTOMER)
        .url_params_typed::<ItemPath>()
        .field_doc("url.itemId", "Menu item to remove")
        .error_code(404, "Item not in cart")
        .response_list::<CartLineDto>()
        .build()
}

/// `POST /v1/orders`
pub fn checkout() -> Result<Contract, ContractError> {
    ContractBuilder::post("/v1/orders")
        .summary("Place an order from the caller's cart")
        .tag(TAG)
        .allow(CUSTOMER)
        .error_code(409, "Cart is empty")
        .response_typed::<OrderDto>()
        .build()
}

/// `GET /v1/admin/orders`
pub fn admin_orders() -> Result<Contract, ContractError> {
    ContractBuilder::get("/v1/admin/orders")
        .summary("List placed orders")
        .description("Restricted to administrators; `customer` narrows the listing.")
        .tag("Admin")
        .allow(ADMIN)
        .request_typed::<OrdersQuery>()
        .response_list::<OrderDto>()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use apikit::Role;

    #[test]
    fn all_contracts_build() {
        let contracts = [list_cart(), add_item(), remove_item(), checkout(), admin_orders()];
        for contract in contracts {
            assert!(contract.is_ok(), "{contract:?}");
        }
    }

    #[test]
    fn identities_and_access() {
        let cart = list_cart().unwrap();
        assert_eq!(cart.identity(), "GET /v1/cart");
        assert!(cart.is_read());
        assert_eq!(cart.cache_hints().stale_time, Some(Duration::from_secs(30)));

        let admin = admin_orders().unwrap();
        assert_eq!(admin.roles(), &[Role::new(ADMIN)]);
        assert!(admin.requires_authentication());

        assert_eq!(remove_item().unwrap().placeholders(), vec!["itemId"]);
    }

    #[test]
    fn add_item_request_is_validated_locally() {
        let contract = add_item().unwrap();
        let errors = contract
            .validate_request(&json!({ "quantity": 1 }))
            .unwrap_err();
        assert_eq!(errors.get("menuItemId"), Some("is required"));
        assert!(contract
            .validate_request(&json!({ "menuItemId": "m-1", "quantity": 0 }))
            .is_err());
    }
}

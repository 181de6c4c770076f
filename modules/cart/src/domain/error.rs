use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("quantity must be at least 1")]
    EmptyQuantity,

    #[error("quantity of {menu_item_id} would reach {requested}, limit is {max}")]
    QuantityLimit {
        menu_item_id: String,
        requested: u32,
        max: u32,
    },

    #[error("item {menu_item_id} is not in the cart")]
    LineNotFound { menu_item_id: String },

    #[error("cart is empty")]
    EmptyCart,
}

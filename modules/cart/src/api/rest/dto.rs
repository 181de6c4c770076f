use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::model::{CartLine, Order};

/// Request body for adding an item to the cart.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub menu_item_id: String,
    #[schema(minimum = 1)]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// URL parameters of item-level cart operations.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemPath {
    pub item_id: String,
}

/// Query parameters of the admin order listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrdersQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLineDto {
    pub menu_item_id: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
    pub id: Uuid,
    pub customer: String,
    pub lines: Vec<CartLineDto>,
    pub total_items: u32,
}

impl From<CartLine> for CartLineDto {
    fn from(line: CartLine) -> Self {
        Self {
            menu_item_id: line.menu_item_id,
            quantity: line.quantity,
            note: line.note,
        }
    }
}

impl From<AddItemRequest> for CartLine {
    fn from(req: AddItemRequest) -> Self {
        Self {
            menu_item_id: req.menu_item_id,
            quantity: req.quantity,
            note: req.note,
        }
    }
}

impl From<Order> for OrderDto {
    fn from(order: Order) -> Self {
        let total_items = order.total_items();
        Self {
            id: order.id,
            customer: order.customer,
            lines: order.lines.into_iter().map(CartLineDto::from).collect(),
            total_items,
        }
    }
}

pub fn lines_to_dto(lines: Vec<CartLine>) -> Vec<CartLineDto> {
    lines.into_iter().map(CartLineDto::from).collect()
}

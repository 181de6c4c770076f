use uuid::Uuid;

/// One menu item in a customer's cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub menu_item_id: String,
    pub quantity: u32,
    pub note: Option<String>,
}

/// A placed order: the cart contents at checkout time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: Uuid,
    pub customer: String,
    pub lines: Vec<CartLine>,
}

impl Order {
    pub fn new(customer: impl Into<String>, lines: Vec<CartLine>) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer: customer.into(),
            lines,
        }
    }

    pub fn total_items(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::domain::error::DomainError;
use crate::domain::model::{CartLine, Order};

/// Storage behind the cart service.
#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn lines(&self, owner: &str) -> Vec<CartLine>;

    /// Add `line` to the owner's cart, summing quantities of the same item.
    /// Fails without changes when the summed quantity exceeds `max_quantity`.
    async fn merge_line(
        &self,
        owner: &str,
        line: CartLine,
        max_quantity: u32,
    ) -> Result<Vec<CartLine>, DomainError>;

    /// Remaining lines, or `None` when the item was not in the cart.
    async fn remove_line(&self, owner: &str, menu_item_id: &str) -> Option<Vec<CartLine>>;

    /// Empty the cart and return what it held.
    async fn take_lines(&self, owner: &str) -> Vec<CartLine>;

    async fn insert_order(&self, order: Order);

    /// Orders in placement order, optionally for one customer only.
    async fn orders(&self, customer: Option<&str>) -> Vec<Order>;
}

/// Process-local repository.
#[derive(Default)]
pub struct InMemoryCartRepository {
    carts: DashMap<String, Vec<CartLine>>,
    orders: RwLock<Vec<Order>>,
}

impl InMemoryCartRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn lines(&self, owner: &str) -> Vec<CartLine> {
        self.carts
            .get(owner)
            .map(|cart| cart.clone())
            .unwrap_or_default()
    }

    async fn merge_line(
        &self,
        owner: &str,
        line: CartLine,
        max_quantity: u32,
    ) -> Result<Vec<CartLine>, DomainError> {
        // The entry guard serialises concurrent adds for the same owner
        let mut cart = self.carts.entry(owner.to_string()).or_default();
        let existing = cart
            .iter_mut()
            .find(|l| l.menu_item_id == line.menu_item_id);
        let current = existing.as_ref().map_or(0, |l| l.quantity);
        let requested = current.saturating_add(line.quantity);
        if requested > max_quantity {
            return Err(DomainError::QuantityLimit {
                menu_item_id: line.menu_item_id,
                requested,
                max: max_quantity,
            });
        }

        match existing {
            Some(existing) => {
                existing.quantity = requested;
                if line.note.is_some() {
                    existing.note = line.note;
                }
            }
            None => cart.push(line),
        }
        Ok(cart.clone())
    }

    async fn remove_line(&self, owner: &str, menu_item_id: &str) -> Option<Vec<CartLine>> {
        let mut cart = self.carts.get_mut(owner)?;
        let index = cart.iter().position(|l| l.menu_item_id == menu_item_id)?;
        cart.remove(index);
        Some(cart.clone())
    }

    async fn take_lines(&self, owner: &str) -> Vec<CartLine> {
        self.carts
            .remove(owner)
            .map(|(_, lines)| lines)
            .unwrap_or_default()
    }

    async fn insert_order(&self, order: Order) {
        self.orders.write().push(order);
    }

    async fn orders(&self, customer: Option<&str>) -> Vec<Order> {
        self.orders
            .read()
            .iter()
            .filter(|o| customer.is_none_or(|c| o.customer == c))
            .cloned()
            .collect()
    }
}

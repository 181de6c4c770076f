use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::config::CartConfig;
use crate::domain::error::DomainError;
use crate::domain::model::{CartLine, Order};
use crate::domain::repo::CartRepository;

/// Cart rules on top of a [`CartRepository`].
#[derive(Clone)]
pub struct CartService {
    repo: Arc<dyn CartRepository>,
    max_quantity: u32,
}

impl CartService {
    pub fn new(repo: Arc<dyn CartRepository>, max_quantity: u32) -> Self {
        Self { repo, max_quantity }
    }

    /// Build the service and load the configured seed orders.
    pub async fn from_config(repo: Arc<dyn CartRepository>, cfg: &CartConfig) -> Self {
        for seed in &cfg.seed {
            let lines = seed
                .lines
                .iter()
                .map(|l| CartLine {
                    menu_item_id: l.menu_item_id.clone(),
                    quantity: l.quantity,
                    note: None,
                })
                .collect();
            repo.insert_order(Order::new(seed.customer.clone(), lines)).await;
        }
        if !cfg.seed.is_empty() {
            info!(orders = cfg.seed.len(), "Loaded seed orders");
        }
        Self::new(repo, cfg.max_quantity)
    }

    pub fn max_quantity(&self) -> u32 {
        self.max_quantity
    }

    #[instrument(name = "cart.service.lines", skip(self))]
    pub async fn lines(&self, owner: &str) -> Vec<CartLine> {
        self.repo.lines(owner).await
    }

    #[instrument(name = "cart.service.add", skip(self, line), fields(menu_item_id = %line.menu_item_id))]
    pub async fn add(&self, owner: &str, line: CartLine) -> Result<Vec<CartLine>, DomainError> {
        if line.quantity == 0 {
            return Err(DomainError::EmptyQuantity);
        }
        let lines = self.repo.merge_line(owner, line, self.max_quantity).await?;
        debug!(lines = lines.len(), "Cart updated");
        Ok(lines)
    }

    #[instrument(name = "cart.service.remove", skip(self))]
    pub async fn remove(&self, owner: &str, menu_item_id: &str) -> Result<Vec<CartLine>, DomainError> {
        self.repo
            .remove_line(owner, menu_item_id)
            .await
            .ok_or_else(|| DomainError::LineNotFound {
                menu_item_id: menu_item_id.to_string(),
            })
    }

    /// Turn the cart into an order and empty it.
    #[instrument(name = "cart.service.checkout", skip(self))]
    pub async fn checkout(&self, owner: &str) -> Result<Order, DomainError> {
        let lines = self.repo.take_lines(owner).await;
        if lines.is_empty() {
            return Err(DomainError::EmptyCart);
        }
        let order = Order::new(owner, lines);
        self.repo.insert_order(order.clone()).await;
        info!(order_id = %order.id, items = order.total_items(), "Order placed");
        Ok(order)
    }

    pub async fn orders(&self, customer: Option<&str>) -> Vec<Order> {
        self.repo.orders(customer).await
    }
}

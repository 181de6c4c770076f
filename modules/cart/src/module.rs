use std::sync::Arc;

use apikit::ApiHost;
use arc_swap::ArcSwapOption;
use tracing::{debug, info};

use crate::config::CartConfig;
use crate::domain::repo::{CartRepository, InMemoryCartRepository};
use crate::domain::service::CartService;

/// Cart feature module: build the service, then mount its operations.
#[derive(Default)]
pub struct CartModule {
    // Set once by `init`, read by `register_rest`
    service: ArcSwapOption<CartService>,
}

impl CartModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialise with the in-memory repository.
    pub async fn init(&self, cfg: &CartConfig) -> anyhow::Result<()> {
        self.init_with_repo(cfg, Arc::new(InMemoryCartRepository::new()))
            .await
    }

    pub async fn init_with_repo(
        &self,
        cfg: &CartConfig,
        repo: Arc<dyn CartRepository>,
    ) -> anyhow::Result<()> {
        info!("Initializing cart module");
        if cfg.max_quantity == 0 {
            anyhow::bail!("cart.max_quantity must be at least 1");
        }
        debug!(max_quantity = cfg.max_quantity, seed_orders = cfg.seed.len(), "Loaded cart config");

        let service = CartService::from_config(repo, cfg).await;
        self.service.store(Some(Arc::new(service)));
        info!("CartService initialized successfully");
        Ok(())
    }

    pub fn service(&self) -> Option<Arc<CartService>> {
        self.service.load_full()
    }

    pub fn register_rest(&self, host: &ApiHost) -> anyhow::Result<()> {
        info!("Registering cart REST routes");
        let service = self
            .service()
            .ok_or_else(|| anyhow::anyhow!("Service not initialized"))?;
        crate::api::rest::routes::register_routes(host, service)?;
        info!("Cart REST routes registered successfully");
        Ok(())
    }
}

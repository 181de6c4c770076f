use serde::{Deserialize, Serialize};

/// Configuration for the cart module (`modules.cart`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CartConfig {
    /// Upper bound on the quantity of one menu item in a cart.
    #[serde(default = "default_max_quantity")]
    pub max_quantity: u32,
    /// Orders loaded into the repository at start-up.
    #[serde(default)]
    pub seed: Vec<SeedOrder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedOrder {
    pub customer: String,
    pub lines: Vec<SeedLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedLine {
    pub menu_item_id: String,
    pub quantity: u32,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            max_quantity: default_max_quantity(),
            seed: Vec::new(),
        }
    }
}

fn default_max_quantity() -> u32 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_section_uses_defaults() {
        let cfg: CartConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cfg.max_quantity, 20);
        assert!(cfg.seed.is_empty());
    }

    #[test]
    fn seed_orders_parse() {
        let cfg: CartConfig = serde_json::from_value(json!({
            "max_quantity": 5,
            "seed": [{ "customer": "carol", "lines": [{ "menu_item_id": "m-1", "quantity": 2 }] }]
        }))
        .unwrap();
        assert_eq!(cfg.max_quantity, 5);
        assert_eq!(cfg.seed[0].lines[0].quantity, 2);
    }
}

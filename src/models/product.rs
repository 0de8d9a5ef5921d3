use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Product fields handed over by the CRUD handlers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_stock: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reorder_level: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ProductSnapshot {
    pub fn new(product_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_stock(mut self, in_stock: i64, reorder_level: i64) -> Self {
        self.in_stock = Some(in_stock);
        self.reorder_level = Some(reorder_level);
        self
    }

    pub fn is_low_stock(&self) -> bool {
        match (self.in_stock, self.reorder_level) {
            (Some(in_stock), Some(reorder_level)) => in_stock <= reorder_level,
            _ => false,
        }
    }

    pub fn to_payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

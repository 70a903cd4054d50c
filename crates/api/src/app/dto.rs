use serde::{Deserialize, Serialize};
use serde_json::Value;

use globalcat_core::{ReadMode, RegionCode};
use globalcat_store::{Attributes, Row};

// ---- Products ----

#[derive(Debug, Deserialize)]
pub struct ProductIn {
    pub product_id: String,
    pub region_code: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub attrs: Option<Attributes>,
}

impl ProductIn {
    /// Row payload; identifiers become the key, not attributes. Absent and
    /// `null` fields are left out.
    pub fn payload(self) -> Attributes {
        let mut payload = Attributes::new();
        if let Some(title) = self.title {
            payload.insert("title".to_string(), Value::from(title));
        }
        if let Some(currency) = self.currency {
            payload.insert("currency".to_string(), Value::from(currency));
        }
        if let Some(price) = self.price {
            payload.insert("price".to_string(), Value::from(price));
        }
        if let Some(attrs) = self.attrs {
            payload.insert("attrs".to_string(), Value::Object(attrs));
        }
        payload
    }
}

#[derive(Debug, Serialize)]
pub struct ProductReadResponse {
    pub found: bool,
    pub item: Row,
    pub latency_ms: f64,
    pub consistency: ReadMode,
    pub region: RegionCode,
}

// ---- Inventory ----

#[derive(Debug, Deserialize)]
pub struct InventoryIn {
    pub product_id: String,
    pub warehouse_id: String,
    pub region_code: String,
    #[serde(default)]
    pub inc: i64,
    #[serde(default)]
    pub dec: i64,
}

#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    pub region: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InventoryWriteResponse {
    pub ok: bool,
    pub latency_ms: f64,
    pub item: Row,
    pub merged_qty: i64,
}

// ---- System ----

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub region: RegionCode,
}

//! Read-only view over the `final` payload's recommendations.

use serde::Serialize;
use serde_json::Value;

use crate::sse::payload_text;

/// A recommended product as shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Product {
    pub style_code: Option<String>,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub price: Option<String>,
    pub image_url: Option<String>,
    pub url: Option<String>,
}

impl Product {
    /// Builds a product from a loosely-typed record. Upper-case key variants
    /// are accepted and blank values count as missing.
    pub fn from_value(value: &Value) -> Self {
        Self {
            style_code: pick(value, &["style_code", "STYLE_CODE"]),
            name: pick(value, &["product_name", "PRODUCT_NAME"]),
            brand: pick(value, &["brand", "BRAND"]),
            price: pick(value, &["price", "PRICE"]),
            image_url: pick(value, &["image_url", "IMAGE_URL"])
                .map(|url| url.strip_suffix('?').unwrap_or(&url).to_string()),
            url: pick(value, &["url", "URL"]),
        }
    }
}

/// Extracts `recommended_products`; anything but an array yields nothing.
pub fn recommended_products(final_meta: Option<&Value>) -> Vec<Product> {
    final_meta
        .and_then(|meta| meta.get("recommended_products"))
        .and_then(Value::as_array)
        .map(|items| items.iter().map(Product::from_value).collect())
        .unwrap_or_default()
}

/// Extracts `recommended_style_codes`, skipping non-string entries.
pub fn recommended_style_codes(final_meta: Option<&Value>) -> Vec<String> {
    final_meta
        .and_then(|meta| meta.get("recommended_style_codes"))
        .and_then(Value::as_array)
        .map(|codes| {
            codes
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn pick(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let field = value.get(key)?;
        let text = payload_text(field);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}

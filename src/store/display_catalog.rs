//! DisplayCatalog REST client (MSIX/AppX product listings)

use crate::error::Result;
use crate::http::{expect_success, MsHttpClient};
use crate::platform::Locale;
use serde_json::Value;
use tracing::debug;

/// DisplayCatalog deployment ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayCatalogEndpoint {
    #[default]
    Production,
    Int,
}

impl DisplayCatalogEndpoint {
    fn base_url(self) -> &'static str {
        match self {
            DisplayCatalogEndpoint::Production => {
                "https://displaycatalog.mp.microsoft.com/v7.0/products"
            }
            DisplayCatalogEndpoint::Int => {
                "https://displaycatalog-int.mp.microsoft.com/v7.0/products"
            }
        }
    }
}

/// Result of a DisplayCatalog query
#[derive(Debug, Clone)]
pub struct DisplayCatalogResult {
    /// Response document, with a singular `Product` promoted to `Products`
    pub document: Value,
    pub is_found: bool,
}

impl DisplayCatalogResult {
    /// First product entry, when any
    pub fn product(&self) -> Option<&Value> {
        self.document.get("Products")?.as_array()?.first()
    }

    /// `WuCategoryId` from the first SKU's fulfillment data
    ///
    /// `FulfillmentData` arrives either as an object or as an embedded JSON
    /// string; both shapes are accepted.
    pub fn wu_category_id(&self) -> Option<String> {
        let sku_properties = self
            .product()?
            .get("DisplaySkuAvailabilities")?
            .as_array()?
            .first()?
            .get("Sku")?
            .get("Properties")?;
        let fulfillment = sku_properties.get("FulfillmentData")?;
        let category = match fulfillment {
            Value::Object(map) => map.get("WuCategoryId")?.as_str()?.to_string(),
            Value::String(raw) => {
                let parsed: Value = serde_json::from_str(raw).ok()?;
                parsed.get("WuCategoryId")?.as_str()?.to_string()
            }
            _ => return None,
        };
        Some(category)
    }

    /// Localized title / publisher / description of the first product
    pub fn localized(&self, field: &str) -> Option<String> {
        self.product()?
            .get("LocalizedProperties")?
            .as_array()?
            .first()?
            .get(field)?
            .as_str()
            .map(str::to_string)
    }

    /// Original release date from the first market-properties entry
    pub fn release_date(&self) -> Option<String> {
        self.product()?
            .get("MarketProperties")?
            .as_array()?
            .first()?
            .get("OriginalReleaseDate")?
            .as_str()
            .map(str::to_string)
    }

    /// Product category
    pub fn category(&self) -> Option<String> {
        self.product()?
            .get("Properties")?
            .get("Category")?
            .as_str()
            .map(str::to_string)
    }

    /// MSRP of the first availability's order-management data
    pub fn price_msrp(&self) -> Option<f64> {
        self.product()?
            .get("DisplaySkuAvailabilities")?
            .as_array()?
            .first()?
            .get("Availabilities")?
            .as_array()?
            .first()?
            .get("OrderManagementData")?
            .get("Price")?
            .get("MSRP")?
            .as_f64()
    }
}

/// Client for the DisplayCatalog product endpoint
pub struct DisplayCatalogClient<'a> {
    http: &'a MsHttpClient,
    endpoint: DisplayCatalogEndpoint,
}

impl<'a> DisplayCatalogClient<'a> {
    pub fn new(http: &'a MsHttpClient, endpoint: DisplayCatalogEndpoint) -> Self {
        Self { http, endpoint }
    }

    /// Query one product listing
    pub fn query(&self, product_id: &str, market: &str, language: &str) -> Result<DisplayCatalogResult> {
        let locale = Locale {
            market: market.to_string(),
            language: language.to_string(),
            include_neutral: true,
        };
        let url = format!(
            "{}/{}?{}",
            self.endpoint.base_url(),
            product_id,
            locale.query_fragment()
        );
        debug!(%url, "querying DisplayCatalog");

        let response = expect_success(self.http.get_json(&url)?)?;
        let document: Value = response.json().map_err(crate::error::ToolkitError::from)?;
        Ok(normalize_document(document))
    }
}

/// Promote a singular `Product` into a one-element `Products` array
fn normalize_document(mut document: Value) -> DisplayCatalogResult {
    let has_products = document
        .get("Products")
        .and_then(Value::as_array)
        .is_some_and(|products| !products.is_empty());

    if !has_products {
        if let Some(product) = document.get("Product").cloned() {
            if !product.is_null() {
                document["Products"] = Value::Array(vec![product]);
            }
        }
    }

    let is_found = document
        .get("Products")
        .and_then(Value::as_array)
        .is_some_and(|products| !products.is_empty());

    DisplayCatalogResult { document, is_found }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_singular_product_promotion() {
        let result = normalize_document(json!({ "Product": { "ProductId": "9NKSQGP7F2NH" } }));
        assert!(result.is_found);
        assert_eq!(
            result.product().unwrap()["ProductId"],
            json!("9NKSQGP7F2NH")
        );
    }

    #[test]
    fn test_empty_document_not_found() {
        let result = normalize_document(json!({}));
        assert!(!result.is_found);
        assert!(result.product().is_none());
    }

    #[test]
    fn test_wu_category_id_from_object() {
        let result = normalize_document(json!({
            "Products": [{
                "DisplaySkuAvailabilities": [{
                    "Sku": { "Properties": { "FulfillmentData": { "WuCategoryId": "abc-123" } } }
                }]
            }]
        }));
        assert_eq!(result.wu_category_id().as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_wu_category_id_from_embedded_json_string() {
        let result = normalize_document(json!({
            "Products": [{
                "DisplaySkuAvailabilities": [{
                    "Sku": { "Properties": {
                        "FulfillmentData": "{\"WuCategoryId\":\"embedded-456\"}"
                    } }
                }]
            }]
        }));
        assert_eq!(result.wu_category_id().as_deref(), Some("embedded-456"));
    }
}

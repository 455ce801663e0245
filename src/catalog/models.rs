use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Season {
    Winter,
    #[default]
    Summer,
    AllSeason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    #[default]
    Car,
    Cargo,
    Suv,
    Truck,
    Agro,
}

/// Canonical product row as stored in the catalog table.
///
/// `id` and `image_url` are skipped when absent so that feed upserts never
/// clear a photo written by the photo sync.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub catalog_number: String,
    pub supplier_id: i64,
    #[serde(default)]
    pub product_number: String,
    pub title: String,
    #[serde(default)]
    pub manufacturer: String,
    pub price: Decimal,
    pub base_price: Decimal,
    pub stock_quantity: i64,
    pub in_stock: bool,
    #[serde(default)]
    pub season: Season,
    #[serde(default)]
    pub vehicle_type: VehicleType,
    #[serde(default)]
    pub radius: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl CatalogRecord {
    /// Business key; `None` when the supplier sent no catalog number.
    pub fn key(&self) -> Option<CatalogKey> {
        let catalog_number = self.catalog_number.trim();
        if catalog_number.is_empty() {
            return None;
        }
        Some(CatalogKey {
            catalog_number: catalog_number.to_string(),
            supplier_id: self.supplier_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogKey {
    pub catalog_number: String,
    pub supplier_id: i64,
}

/// Minimal projection returned when diffing a page against the store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExistingRecord {
    pub id: i64,
    pub catalog_number: String,
    pub supplier_id: i64,
}

/// Projection used by the photo sync.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PhotoCandidate {
    pub id: i64,
    #[serde(default)]
    pub catalog_number: String,
    #[serde(default)]
    pub product_number: String,
    pub supplier_id: i64,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn season_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(Season::AllSeason).unwrap(),
            json!("all-season")
        );
        assert_eq!(serde_json::to_value(VehicleType::Suv).unwrap(), json!("suv"));
    }

    #[test]
    fn record_without_catalog_number_has_no_key() {
        let record = CatalogRecord {
            id: None,
            catalog_number: "  ".into(),
            supplier_id: 7,
            product_number: String::new(),
            title: "Tyre".into(),
            manufacturer: String::new(),
            price: Decimal::ZERO,
            base_price: Decimal::ZERO,
            stock_quantity: 0,
            in_stock: false,
            season: Season::Summer,
            vehicle_type: VehicleType::Car,
            radius: String::new(),
            image_url: None,
            description: String::new(),
        };
        assert!(record.key().is_none());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("image_url").is_none());
        assert_eq!(value["price"], json!("0"));
    }
}

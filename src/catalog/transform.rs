use crate::catalog::classify::{classify_vehicle_type, detect_season, normalize_radius};
use crate::catalog::mapping::{FieldMapping, TargetField};
use crate::catalog::models::CatalogRecord;
use crate::catalog::normalize::{
    extract_string, lookup_key, parse_price, parse_stock, price_for_storage,
};
use crate::catalog::scanner::resolve_path;
use rust_decimal::Decimal;
use serde_json::Value;

/// Alternate top-level keys tried when the mapped price is empty.
const FALLBACK_PRICE_KEYS: &[&str] = &["CustomerPrice", "Price"];

/// Key fragments that mark a value as price-like during the deep scan.
const PRICE_LIKE_FRAGMENTS: &[&str] = &["price", "retail", "cost", "ціна", "цена"];

const DEEP_SCAN_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    pub supplier_id: i64,
    /// Retail = cost * markup when only one side is known.
    pub markup: Decimal,
}

impl TransformOptions {
    pub fn new(supplier_id: i64) -> Self {
        Self {
            supplier_id,
            markup: Decimal::new(12, 1),
        }
    }
}

fn mapped<'a>(raw: &'a Value, mapping: &FieldMapping, field: TargetField) -> Option<&'a Value> {
    mapping.path(field).and_then(|path| resolve_path(raw, path))
}

/// Stock as the transformer would compute it; used to drop out-of-stock rows
/// before paying for a full transform.
pub fn raw_stock_quantity(raw: &Value, mapping: &FieldMapping) -> i64 {
    parse_stock(mapped(raw, mapping, TargetField::Stock))
}

pub fn transform(raw: &Value, mapping: &FieldMapping, options: &TransformOptions) -> CatalogRecord {
    let text = |field| extract_string(mapped(raw, mapping, field));

    let title = text(TargetField::Title);
    let (price, base_price) = resolve_prices(raw, mapping, options.markup);
    let stock_quantity = raw_stock_quantity(raw, mapping);

    let radius = normalize_radius(&text(TargetField::Radius), &title);
    let season_hint = text(TargetField::Season);
    let season = if season_hint.is_empty() {
        detect_season(&title)
    } else {
        detect_season(&format!("{season_hint} {title}"))
    };
    let vehicle_type = classify_vehicle_type(&title, &radius);

    CatalogRecord {
        id: None,
        catalog_number: text(TargetField::CatalogNumber),
        supplier_id: options.supplier_id,
        product_number: text(TargetField::ProductNumber),
        manufacturer: text(TargetField::Manufacturer),
        price,
        base_price,
        stock_quantity,
        in_stock: stock_quantity > 0,
        season,
        vehicle_type,
        radius,
        image_url: None,
        description: text(TargetField::Description),
        title,
    }
}

/// Resolves retail and cost prices, rounded for storage.
///
/// Retail falls back from the mapped path to well-known top-level keys and
/// then to a deep scan of price-like keys. A side still at zero is
/// synthesized from the other through `markup`.
fn resolve_prices(raw: &Value, mapping: &FieldMapping, markup: Decimal) -> (Decimal, Decimal) {
    let mut price = parse_price(mapped(raw, mapping, TargetField::Price));
    if price.is_zero() {
        price = fallback_price(raw);
    }
    let mut base_price = parse_price(mapped(raw, mapping, TargetField::BasePrice));

    if price.is_zero() && !base_price.is_zero() {
        price = base_price * markup;
    } else if base_price.is_zero() && !price.is_zero() && !markup.is_zero() {
        base_price = price / markup;
    }
    (price_for_storage(price), price_for_storage(base_price))
}

fn fallback_price(raw: &Value) -> Decimal {
    if let Value::Object(map) = raw {
        let direct = FALLBACK_PRICE_KEYS
            .iter()
            .filter_map(|key| lookup_key(map, key))
            .map(|value| parse_price(Some(value)))
            .find(|price| !price.is_zero());
        if let Some(price) = direct {
            return price;
        }
    }
    deep_price_scan(raw, 0).unwrap_or(Decimal::ZERO)
}

fn deep_price_scan(value: &Value, depth: usize) -> Option<Decimal> {
    if depth > DEEP_SCAN_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => map.iter().find_map(|(key, child)| {
            let lowered = key.to_lowercase();
            let price_like = PRICE_LIKE_FRAGMENTS
                .iter()
                .any(|fragment| lowered.contains(fragment));
            if price_like {
                let price = parse_price(Some(child));
                if !price.is_zero() {
                    return Some(price);
                }
            }
            deep_price_scan(child, depth + 1)
        }),
        Value::Array(items) => items.iter().find_map(|item| deep_price_scan(item, depth + 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::{Season, VehicleType};
    use serde_json::json;

    fn mapping() -> FieldMapping {
        let mut mapping = FieldMapping::default();
        mapping.set_manual(TargetField::CatalogNumber, "Code");
        mapping.set_manual(TargetField::ProductNumber, "ProductId");
        mapping.set_manual(TargetField::Title, "Name");
        mapping.set_manual(TargetField::Manufacturer, "Brand");
        mapping.set_manual(TargetField::Price, "Price.Retail");
        mapping.set_manual(TargetField::BasePrice, "Purchase");
        mapping.set_manual(TargetField::Stock, "Stocks");
        mapping
    }

    #[test]
    fn full_record() {
        let raw = json!({
            "Code": "MI-205-55-16",
            "ProductId": 88123,
            "Name": "Michelin Alpin 6 205/55 R16 91H",
            "Brand": {"Id": 4, "Name": "Michelin"},
            "Price": {"Retail": "4 250,00"},
            "Purchase": "3500",
            "Stocks": [{"Value": ">10"}, {"Value": "2"}]
        });
        let record = transform(&raw, &mapping(), &TransformOptions::new(3));
        assert_eq!(record.catalog_number, "MI-205-55-16");
        assert_eq!(record.product_number, "88123");
        assert_eq!(record.supplier_id, 3);
        assert_eq!(record.manufacturer, "Michelin");
        assert_eq!(record.price, Decimal::from(4250));
        assert_eq!(record.base_price, Decimal::from(3500));
        assert_eq!(record.stock_quantity, 12);
        assert!(record.in_stock);
        assert_eq!(record.season, Season::Winter);
        assert_eq!(record.radius, "R16");
        assert_eq!(record.vehicle_type, VehicleType::Car);
        assert_eq!(record.image_url, None);
    }

    #[test]
    fn missing_paths_degrade_to_defaults() {
        let record = transform(&json!({"Other": 1}), &mapping(), &TransformOptions::new(1));
        assert_eq!(record.catalog_number, "");
        assert_eq!(record.price, Decimal::ZERO);
        assert_eq!(record.base_price, Decimal::ZERO);
        assert_eq!(record.stock_quantity, 0);
        assert!(!record.in_stock);
        assert!(record.key().is_none());
    }

    #[test]
    fn retail_synthesized_from_cost() {
        let raw = json!({"Code": "A", "Name": "Tyre", "Purchase": "1000"});
        let record = transform(&raw, &mapping(), &TransformOptions::new(1));
        assert_eq!(record.price, Decimal::from(1200));
        assert_eq!(record.base_price, Decimal::from(1000));
    }

    #[test]
    fn cost_synthesized_from_retail() {
        let raw = json!({"Code": "A", "Name": "Tyre", "Price": {"Retail": 1200}});
        let record = transform(&raw, &mapping(), &TransformOptions::new(1));
        assert_eq!(record.base_price, Decimal::from(1000));
    }

    #[test]
    fn price_recovered_from_alternate_keys() {
        let raw = json!({"Code": "A", "Name": "Tyre", "CustomerPrice": "999"});
        let record = transform(&raw, &mapping(), &TransformOptions::new(1));
        assert_eq!(record.price, Decimal::from(999));

        let nested = json!({
            "Code": "B",
            "Name": "Tyre",
            "Offers": [{"Warehouse": "Kyiv", "SalePrice": {"Amount": "1 500"}}]
        });
        let record = transform(&nested, &mapping(), &TransformOptions::new(1));
        assert_eq!(record.price, Decimal::from(1500));
    }

    #[test]
    fn whole_record_binding() {
        let mut mapping = FieldMapping::default();
        mapping.set_manual(TargetField::Title, ".");
        mapping.set_manual(TargetField::CatalogNumber, ".");
        let record = transform(&json!("Bare 195/65 R15 Cargo"), &mapping, &TransformOptions::new(1));
        assert_eq!(record.title, "Bare 195/65 R15 Cargo");
        assert_eq!(record.vehicle_type, VehicleType::Cargo);
    }
}

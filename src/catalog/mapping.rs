//! Canonical field -> source path mapping, auto-detected from a key inventory
//! and editable by the operator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetField {
    CatalogNumber,
    ProductNumber,
    BasePrice,
    Price,
    Stock,
    Manufacturer,
    Title,
    Season,
    Radius,
    Description,
}

impl TargetField {
    /// Detection order. Narrow fields claim their keys before broad ones, so
    /// `BasePrice` is taken before `Price` can fall back to it.
    pub const ALL: [TargetField; 10] = [
        TargetField::CatalogNumber,
        TargetField::ProductNumber,
        TargetField::BasePrice,
        TargetField::Price,
        TargetField::Stock,
        TargetField::Manufacturer,
        TargetField::Title,
        TargetField::Season,
        TargetField::Radius,
        TargetField::Description,
    ];

    pub const REQUIRED: [TargetField; 2] = [TargetField::CatalogNumber, TargetField::Title];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetField::CatalogNumber => "catalog_number",
            TargetField::ProductNumber => "product_number",
            TargetField::BasePrice => "base_price",
            TargetField::Price => "price",
            TargetField::Stock => "stock",
            TargetField::Manufacturer => "manufacturer",
            TargetField::Title => "title",
            TargetField::Season => "season",
            TargetField::Radius => "radius",
            TargetField::Description => "description",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            TargetField::CatalogNumber => &[
                "catalognumber",
                "catalog_number",
                "article",
                "articul",
                "artikul",
                "sku",
                "code",
                "partnumber",
                "vendorcode",
                "артикул",
                "код",
            ],
            TargetField::ProductNumber => &[
                "productnumber",
                "product_number",
                "productid",
                "product_id",
                "itemid",
                "id",
            ],
            TargetField::BasePrice => &[
                "baseprice",
                "base_price",
                "purchaseprice",
                "wholesale",
                "cost",
                "opt",
                "закупка",
                "вхідна",
            ],
            TargetField::Price => &[
                "price",
                "retail",
                "uah",
                "rrc",
                "customerprice",
                "ціна",
                "цена",
            ],
            TargetField::Stock => &[
                "stock",
                "stocks",
                "qty",
                "quantity",
                "rest",
                "rests",
                "available",
                "balance",
                "наличие",
                "залишок",
                "остаток",
                "кількість",
            ],
            TargetField::Manufacturer => &[
                "manufacturer",
                "brand",
                "producer",
                "vendor",
                "make",
                "виробник",
                "бренд",
                "производитель",
            ],
            TargetField::Title => &[
                "title",
                "name",
                "fullname",
                "productname",
                "назва",
                "наименование",
                "найменування",
            ],
            TargetField::Season => &["season", "seasonality", "сезон"],
            TargetField::Radius => &["radius", "diameter", "rim", "радіус", "радиус", "диаметр"],
            TargetField::Description => &["description", "desc", "comment", "опис", "описание"],
        }
    }
}

impl std::str::FromStr for TargetField {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        TargetField::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(input.trim()))
            .ok_or_else(|| format!("unknown target field `{input}`"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    Auto,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinding {
    /// Dotted path into one raw record; `.` binds the whole record.
    pub path: String,
    pub source: BindingSource,
}

/// Substring fallback ignores keywords shorter than this (`id` would match
/// `Width`).
const MIN_SUBSTRING_KEYWORD: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping {
    bindings: BTreeMap<TargetField, FieldBinding>,
}

impl FieldMapping {
    pub fn path(&self, field: TargetField) -> Option<&str> {
        self.bindings.get(&field).map(|binding| binding.path.as_str())
    }

    pub fn binding(&self, field: TargetField) -> Option<&FieldBinding> {
        self.bindings.get(&field)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (TargetField, &FieldBinding)> {
        self.bindings.iter().map(|(field, binding)| (*field, binding))
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn set_manual(&mut self, field: TargetField, path: impl Into<String>) {
        self.bindings.insert(
            field,
            FieldBinding {
                path: path.into(),
                source: BindingSource::Manual,
            },
        );
    }

    pub fn clear(&mut self, field: TargetField) {
        self.bindings.remove(&field);
    }

    pub fn missing_required(&self) -> Vec<TargetField> {
        TargetField::REQUIRED
            .into_iter()
            .filter(|field| {
                self.path(*field)
                    .map(|path| path.trim().is_empty())
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Proposes bindings for every field the operator has not set by hand.
    ///
    /// For each field, in [`TargetField::ALL`] order, the first key whose last
    /// segment equals a keyword wins; otherwise the first key whose path
    /// contains one.
    /// Keys already bound to another field are not reused. Manual bindings are
    /// kept as-is, so the result depends only on `keys` and the manual set.
    pub fn auto_map(&self, keys: &[String]) -> FieldMapping {
        let mut next = FieldMapping::default();
        let mut claimed: HashSet<&str> = HashSet::new();
        for (field, binding) in &self.bindings {
            if binding.source == BindingSource::Manual {
                next.bindings.insert(*field, binding.clone());
                claimed.insert(binding.path.as_str());
            }
        }

        let lowered: Vec<(&str, String, String)> = keys
            .iter()
            .map(|key| {
                let last = key.rsplit('.').next().unwrap_or(key).to_lowercase();
                (key.as_str(), last, key.to_lowercase())
            })
            .collect();

        for field in TargetField::ALL {
            if next.bindings.contains_key(&field) {
                continue;
            }
            let keywords = field.keywords();
            let exact = lowered.iter().find(|(key, last, _)| {
                !claimed.contains(key) && keywords.contains(&last.as_str())
            });
            let chosen = exact.or_else(|| {
                lowered.iter().find(|(key, _, full)| {
                    !claimed.contains(key)
                        && keywords
                            .iter()
                            .filter(|kw| kw.chars().count() >= MIN_SUBSTRING_KEYWORD)
                            .any(|kw| full.contains(kw))
                })
            });
            if let Some((key, _, _)) = chosen {
                claimed.insert(*key);
                next.bindings.insert(
                    field,
                    FieldBinding {
                        path: (*key).to_string(),
                        source: BindingSource::Auto,
                    },
                );
            }
        }
        next
    }

    /// Applies operator edits on top of this mapping. An empty path clears
    /// the field.
    pub fn merge_manual(&mut self, edits: &BTreeMap<TargetField, String>) {
        for (field, path) in edits {
            if path.trim().is_empty() {
                self.clear(*field);
            } else {
                self.set_manual(*field, path.trim());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|key| key.to_string()).collect()
    }

    fn sample_keys() -> Vec<String> {
        keys(&[
            "ProductId",
            "Code",
            "Name",
            "Brand.Name",
            "Price",
            "Price.CustomerPrice",
            "PurchasePrice",
            "Stocks",
            "Width",
        ])
    }

    #[test]
    fn auto_map_prefers_exact_segments() {
        let mapping = FieldMapping::default().auto_map(&sample_keys());
        assert_eq!(mapping.path(TargetField::CatalogNumber), Some("Code"));
        assert_eq!(mapping.path(TargetField::ProductNumber), Some("ProductId"));
        assert_eq!(mapping.path(TargetField::Price), Some("Price"));
        assert_eq!(mapping.path(TargetField::BasePrice), Some("PurchasePrice"));
        assert_eq!(mapping.path(TargetField::Stock), Some("Stocks"));
        assert_eq!(mapping.path(TargetField::Title), Some("Name"));
        assert_eq!(mapping.path(TargetField::Manufacturer), Some("Brand.Name"));
        assert_eq!(mapping.path(TargetField::Radius), None);
        assert!(mapping.missing_required().is_empty());
    }

    #[test]
    fn auto_map_is_idempotent() {
        let first = FieldMapping::default().auto_map(&sample_keys());
        let second = first.auto_map(&sample_keys());
        assert_eq!(first, second);
    }

    #[test]
    fn auto_map_keeps_manual_bindings() {
        let mut mapping = FieldMapping::default();
        mapping.set_manual(TargetField::Price, "Price.CustomerPrice");
        let mapped = mapping.auto_map(&sample_keys());
        let binding = mapped.binding(TargetField::Price).unwrap();
        assert_eq!(binding.path, "Price.CustomerPrice");
        assert_eq!(binding.source, BindingSource::Manual);
        assert_eq!(mapped, mapped.auto_map(&sample_keys()));
    }

    #[test]
    fn substring_fallback_skips_short_keywords() {
        let mapping = FieldMapping::default().auto_map(&keys(&["Width", "RetailPriceUah"]));
        assert_eq!(mapping.path(TargetField::ProductNumber), None);
        assert_eq!(mapping.path(TargetField::Price), Some("RetailPriceUah"));
        assert_eq!(
            mapping.missing_required(),
            vec![TargetField::CatalogNumber, TargetField::Title]
        );
    }

    #[test]
    fn merge_manual_sets_and_clears() {
        let mut mapping = FieldMapping::default().auto_map(&sample_keys());
        let mut edits = BTreeMap::new();
        edits.insert(TargetField::Title, ".".to_string());
        edits.insert(TargetField::Stock, String::new());
        mapping.merge_manual(&edits);
        assert_eq!(mapping.path(TargetField::Title), Some("."));
        assert_eq!(mapping.path(TargetField::Stock), None);
    }

    #[test]
    fn mapping_round_trips_through_json() {
        let mapping = FieldMapping::default().auto_map(&sample_keys());
        let raw = serde_json::to_string(&mapping).unwrap();
        assert!(raw.contains("\"catalog_number\":{\"path\":\"Code\",\"source\":\"auto\"}"));
        let back: FieldMapping = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, mapping);
    }
}

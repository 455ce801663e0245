//! Value normalizers for supplier payloads.
//!
//! Every function here is total: malformed input degrades to a zero value
//! (`0`, `""`) instead of an error so one bad field never aborts a page.

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Number, Value};

/// Sub-keys probed, in order, when a price arrives wrapped in an object.
const PRICE_KEYS: &[&str] = &[
    "CustomerPrice",
    "Price",
    "Value",
    "Amount",
    "Retail",
    "RetailPrice",
    "Cost",
    "Sum",
];

/// Sub-keys probed when a stock entry arrives wrapped in an object.
const STOCK_KEYS: &[&str] = &[
    "Value",
    "Quantity",
    "Qty",
    "Stock",
    "Count",
    "Rest",
    "Amount",
    "Available",
];

const STRING_KEYS: &[&str] = &["value", "name", "id", "code"];

const MAX_NESTING: usize = 6;

/// Shape of a raw supplier value, decided once so each normalizer can match
/// exhaustively instead of probing properties.
#[derive(Debug, Clone, Copy)]
pub enum RawValue<'a> {
    Absent,
    Scalar(Scalar<'a>),
    KeyedWrapper(&'a Map<String, Value>),
    List(&'a [Value]),
}

#[derive(Debug, Clone, Copy)]
pub enum Scalar<'a> {
    Bool(bool),
    Number(&'a Number),
    Text(&'a str),
}

impl<'a> From<Option<&'a Value>> for RawValue<'a> {
    fn from(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => RawValue::Absent,
            Some(Value::Bool(flag)) => RawValue::Scalar(Scalar::Bool(*flag)),
            Some(Value::Number(number)) => RawValue::Scalar(Scalar::Number(number)),
            Some(Value::String(text)) => RawValue::Scalar(Scalar::Text(text)),
            Some(Value::Object(map)) => RawValue::KeyedWrapper(map),
            Some(Value::Array(items)) => RawValue::List(items),
        }
    }
}

impl<'a> From<&'a Value> for RawValue<'a> {
    fn from(value: &'a Value) -> Self {
        RawValue::from(Some(value))
    }
}

/// Case-insensitive key lookup, exact match first.
pub fn lookup_key<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    })
}

/// Parses a price from a number, a formatted string or a wrapper object.
///
/// String handling:
/// - everything except digits, `.`, `,` and `-` is dropped;
/// - when the group after the last comma has exactly two digits the comma is
///   the decimal separator and dots are thousands separators, otherwise
///   commas are thousands separators;
/// - with several dots left the value is malformed: the dots before the last
///   one are collapsed and only the whole part is kept (`1234.56.78` =
///   123456, `1.234.567` = 1234).
///
/// Negative results clamp to zero.
pub fn parse_price(raw: Option<&Value>) -> Decimal {
    price_from(RawValue::from(raw), 0).max(Decimal::ZERO)
}

/// Rounds a price to whole units the way it is stored in the catalog.
pub fn price_for_storage(price: Decimal) -> Decimal {
    price
        .max(Decimal::ZERO)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

fn price_from(raw: RawValue<'_>, depth: usize) -> Decimal {
    if depth > MAX_NESTING {
        return Decimal::ZERO;
    }
    match raw {
        RawValue::Absent | RawValue::Scalar(Scalar::Bool(_)) => Decimal::ZERO,
        RawValue::Scalar(Scalar::Number(number)) => decimal_from_number(number),
        RawValue::Scalar(Scalar::Text(text)) => parse_price_text(text),
        RawValue::KeyedWrapper(map) => PRICE_KEYS
            .iter()
            .filter_map(|key| lookup_key(map, key))
            .map(|value| price_from(value.into(), depth + 1))
            .find(|price| *price > Decimal::ZERO)
            .unwrap_or(Decimal::ZERO),
        RawValue::List(items) => items
            .first()
            .map(|first| price_from(first.into(), depth + 1))
            .unwrap_or(Decimal::ZERO),
    }
}

fn decimal_from_number(number: &Number) -> Decimal {
    if let Some(whole) = number.as_i64() {
        return Decimal::from(whole);
    }
    let text = number.to_string();
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&text))
        .unwrap_or(Decimal::ZERO)
}

fn parse_price_text(raw: &str) -> Decimal {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    let kept = kept.trim_matches(|c| c == '.' || c == ',');
    if kept.is_empty() {
        return Decimal::ZERO;
    }

    let unified = match kept.rsplit_once(',') {
        Some((_, tail)) if tail.len() == 2 && tail.chars().all(|c| c.is_ascii_digit()) => {
            kept.replace('.', "").replace(',', ".")
        }
        Some(_) => kept.replace(',', ""),
        None => kept.to_string(),
    };

    let dots = unified.matches('.').count();
    if dots <= 1 {
        return unified.parse::<Decimal>().unwrap_or(Decimal::ZERO);
    }

    let (head, tail) = unified.rsplit_once('.').unwrap_or((unified.as_str(), ""));
    format!("{}.{}", head.replace('.', ""), tail)
        .parse::<Decimal>()
        .map(|value| value.trunc())
        .unwrap_or(Decimal::ZERO)
}

/// Parses a stock quantity.
///
/// Lists are summed per element (one element per warehouse). Comparison
/// prefixes such as `">5"` are stripped and the remainder is taken as the
/// exact count, so `">5"` counts as 5. That is a lower bound, which is all
/// `in_stock` needs.
pub fn parse_stock(raw: Option<&Value>) -> i64 {
    stock_from(RawValue::from(raw), 0)
}

fn stock_from(raw: RawValue<'_>, depth: usize) -> i64 {
    if depth > MAX_NESTING {
        return 0;
    }
    match raw {
        RawValue::Absent | RawValue::Scalar(Scalar::Bool(_)) => 0,
        RawValue::Scalar(Scalar::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value.trunc() as i64))
            .unwrap_or(0)
            .max(0),
        RawValue::Scalar(Scalar::Text(text)) => parse_stock_text(text),
        RawValue::KeyedWrapper(map) => STOCK_KEYS
            .iter()
            .find_map(|key| lookup_key(map, key))
            .map(|value| stock_from(value.into(), depth + 1))
            .unwrap_or(0),
        RawValue::List(items) => items
            .iter()
            .map(|item| stock_from(item.into(), depth + 1))
            .fold(0i64, i64::saturating_add),
    }
}

fn parse_stock_text(raw: &str) -> i64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '>' | '<' | '+') && !c.is_whitespace())
        .collect();
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| {
            cleaned
                .replace(',', ".")
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(|value| value.trunc() as i64)
        })
        .unwrap_or(0)
        .max(0)
}

/// Extracts display text. Wrapper objects yield their first `value`, `name`,
/// `id` or `code` entry; lists yield their first element.
pub fn extract_string(raw: Option<&Value>) -> String {
    string_from(RawValue::from(raw), 0)
}

fn string_from(raw: RawValue<'_>, depth: usize) -> String {
    if depth > MAX_NESTING {
        return String::new();
    }
    match raw {
        RawValue::Absent => String::new(),
        RawValue::Scalar(Scalar::Bool(flag)) => flag.to_string(),
        RawValue::Scalar(Scalar::Number(number)) => number.to_string(),
        RawValue::Scalar(Scalar::Text(text)) => text.trim().to_string(),
        RawValue::KeyedWrapper(map) => STRING_KEYS
            .iter()
            .find_map(|key| lookup_key(map, key))
            .map(|value| string_from(value.into(), depth + 1))
            .unwrap_or_default(),
        RawValue::List(items) => items
            .first()
            .map(|first| string_from(first.into(), depth + 1))
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn price(value: Value) -> Decimal {
        parse_price(Some(&value))
    }

    #[test]
    fn price_with_comma_decimal_and_spaced_thousands() {
        assert_eq!(price(json!("1 234,56")), Decimal::new(123456, 2));
        assert_eq!(price(json!("1.234,50 грн")), Decimal::new(123450, 2));
    }

    #[test]
    fn price_with_comma_thousands() {
        assert_eq!(price(json!("1,234.5")), Decimal::new(12345, 1));
        assert_eq!(price(json!("12,345")), Decimal::from(12345));
    }

    #[test]
    fn price_with_repeated_dots_keeps_whole_part() {
        assert_eq!(price(json!("1234.56.78")), Decimal::from(123456));
        assert_eq!(price(json!("1.234.567")), Decimal::from(1234));
        assert_eq!(price(json!("12.5.0")), Decimal::from(125));
    }

    #[test]
    fn price_from_nested_wrappers() {
        assert_eq!(
            price(json!({"Currency": "UAH", "CustomerPrice": "2 100,00"})),
            Decimal::from(2100)
        );
        assert_eq!(
            price(json!({"Price": {"Value": 0}, "Cost": 950})),
            Decimal::from(950)
        );
        assert_eq!(price(json!([{"value": "15.5"}, 99])), Decimal::new(155, 1));
    }

    #[test]
    fn price_is_total() {
        assert_eq!(parse_price(None), Decimal::ZERO);
        assert_eq!(price(Value::Null), Decimal::ZERO);
        assert_eq!(price(json!(true)), Decimal::ZERO);
        assert_eq!(price(json!([])), Decimal::ZERO);
        assert_eq!(price(json!({})), Decimal::ZERO);
        assert_eq!(price(json!("n/a")), Decimal::ZERO);
        assert_eq!(price(json!("-15")), Decimal::ZERO);
        assert_eq!(price(json!(1.5e3)), Decimal::from(1500));
    }

    #[test]
    fn storage_rounding_is_to_whole_units() {
        assert_eq!(price_for_storage(Decimal::new(123456, 2)), Decimal::from(1235));
        assert_eq!(price_for_storage(Decimal::new(25, 1)), Decimal::from(3));
    }

    #[test]
    fn stock_sums_warehouses_with_operator_prefixes() {
        let raw = json!([{"Value": ">5"}, {"Value": "3"}]);
        assert_eq!(parse_stock(Some(&raw)), 8);
    }

    #[test]
    fn stock_scalars_and_wrappers() {
        assert_eq!(parse_stock(Some(&json!("+ 12"))), 12);
        assert_eq!(parse_stock(Some(&json!("<4"))), 4);
        assert_eq!(parse_stock(Some(&json!(7.9))), 7);
        assert_eq!(parse_stock(Some(&json!({"Quantity": "20"}))), 20);
        assert_eq!(parse_stock(Some(&json!("many"))), 0);
        assert_eq!(parse_stock(Some(&json!(-3))), 0);
        assert_eq!(parse_stock(None), 0);
    }

    #[test]
    fn string_extraction() {
        assert_eq!(extract_string(Some(&json!("  Michelin "))), "Michelin");
        assert_eq!(extract_string(Some(&json!(42))), "42");
        assert_eq!(
            extract_string(Some(&json!({"Name": "Nokian", "Id": 3}))),
            "Nokian"
        );
        assert_eq!(extract_string(Some(&json!({"other": 1}))), "");
        assert_eq!(extract_string(Some(&Value::Null)), "");
    }
}

//! Bundled transformers for the reference `tenders`, `products` and `users` tables.

use chrono::Utc;

use super::normalizer::parse_datetime_text;
use super::transform::TransformRegistry;
use search_sync_shared::{RawDocument, SourceValue};

const ON_SALE_BELOW: f64 = 10.0;

pub(super) fn register(registry: &mut TransformRegistry) {
    registry.register("transformers.transform_tender", transform_tender);
    registry.register("transformers.transform_product", transform_product);
    registry.register("transformers.transform_user", transform_user);
}

/// Identity.
pub fn transform_tender(document: RawDocument) -> Result<RawDocument, String> {
    Ok(document)
}

/// Renames `name` to `product_name`, derives `is_on_sale` from `price`, fills
/// defaults, splits comma-separated `tags` and stamps `created_at`.
pub fn transform_product(mut document: RawDocument) -> Result<RawDocument, String> {
    if let Some(name) = document.remove("name") {
        document.insert("product_name".to_string(), name);
    }

    let price = match document.get("price") {
        None | Some(SourceValue::Null) => 0.0,
        Some(value) => as_number(value).ok_or_else(|| format!("price is {}, not a number", value.kind()))?,
    };
    document.insert("is_on_sale".to_string(), SourceValue::Bool(price < ON_SALE_BELOW));

    set_default(&mut document, "category", SourceValue::from("Uncategorized"));
    set_default(&mut document, "brand", SourceValue::from("Generic"));
    set_default(&mut document, "stock_quantity", SourceValue::Int(0));
    split_list(&mut document, "tags", Vec::new());
    stamp_epoch(&mut document, "created_at");

    Ok(document)
}

/// Builds `full_name`, fills account defaults, splits comma-separated `roles`
/// and stamps `registered_at`.
pub fn transform_user(mut document: RawDocument) -> Result<RawDocument, String> {
    if !document.contains_key("full_name") {
        let full_name = match (
            document.get("first_name"),
            document.get("last_name"),
            document.get("username"),
        ) {
            (Some(first), Some(last), _) => format!("{} {}", display(first), display(last)),
            (_, _, Some(username)) => display(username).to_uppercase(),
            _ => "Unknown User".to_string(),
        };
        document.insert("full_name".to_string(), SourceValue::Text(full_name));
    }

    set_default(&mut document, "account_type", SourceValue::from("free"));
    set_default(&mut document, "status", SourceValue::from("active"));
    split_list(&mut document, "roles", vec![SourceValue::from("user")]);
    stamp_epoch(&mut document, "registered_at");
    set_default(&mut document, "is_verified", SourceValue::Bool(false));

    Ok(document)
}

fn set_default(document: &mut RawDocument, key: &str, value: SourceValue) {
    document.entry(key.to_string()).or_insert(value);
}

fn as_number(value: &SourceValue) -> Option<f64> {
    match value {
        SourceValue::Int(i) => Some(*i as f64),
        SourceValue::Float(f) => Some(*f),
        SourceValue::Json(json) => json.as_f64(),
        _ => None,
    }
}

fn display(value: &SourceValue) -> String {
    match value {
        SourceValue::Text(text) => text.clone(),
        other => other.to_json().to_string(),
    }
}

/// Comma-separated text becomes a list of trimmed, non-empty items.
fn split_list(document: &mut RawDocument, key: &str, default: Vec<SourceValue>) {
    let value = match document.remove(key) {
        None => SourceValue::Array(default),
        Some(SourceValue::Text(text)) => SourceValue::Array(
            text.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(SourceValue::from)
                .collect(),
        ),
        Some(other) => other,
    };
    document.insert(key.to_string(), value);
}

/// Temporal values and date text become epoch seconds. Missing or unparseable
/// values get the current time.
fn stamp_epoch(document: &mut RawDocument, key: &str) {
    let now = Utc::now().timestamp();
    let value = match document.remove(key) {
        None => SourceValue::Int(now),
        Some(SourceValue::Text(text)) => SourceValue::Int(parse_datetime_text(&text).unwrap_or(now)),
        Some(temporal @ (SourceValue::Timestamp(_) | SourceValue::LocalTimestamp(_) | SourceValue::Date(_))) => {
            SourceValue::Int(temporal.epoch_seconds().unwrap_or(now))
        }
        Some(other) => other,
    };
    document.insert(key.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn document(pairs: &[(&str, SourceValue)]) -> RawDocument {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_transform_product() {
        let created = Utc.with_ymd_and_hms(2025, 11, 22, 10, 30, 0).unwrap();
        let doc = transform_product(document(&[
            ("name", SourceValue::from("Desk Lamp")),
            ("price", SourceValue::Float(9.99)),
            ("tags", SourceValue::from("home, lighting, ,desk")),
            ("created_at", SourceValue::Timestamp(created)),
        ]))
        .unwrap();

        assert!(doc.get("name").is_none());
        assert_eq!(doc["product_name"], SourceValue::from("Desk Lamp"));
        assert_eq!(doc["is_on_sale"], SourceValue::Bool(true));
        assert_eq!(doc["category"], SourceValue::from("Uncategorized"));
        assert_eq!(doc["brand"], SourceValue::from("Generic"));
        assert_eq!(doc["stock_quantity"], SourceValue::Int(0));
        assert_eq!(
            doc["tags"],
            SourceValue::Array(vec!["home".into(), "lighting".into(), "desk".into()])
        );
        assert_eq!(doc["created_at"], SourceValue::Int(1763807400));
    }

    #[test]
    fn test_transform_product_defaults() {
        let before = Utc::now().timestamp();
        let doc = transform_product(document(&[("price", SourceValue::Int(25))])).unwrap();

        assert_eq!(doc["is_on_sale"], SourceValue::Bool(false));
        assert_eq!(doc["tags"], SourceValue::Array(Vec::new()));
        assert!(matches!(doc["created_at"], SourceValue::Int(ts) if ts >= before));
    }

    #[test]
    fn test_transform_product_rejects_text_price() {
        let err = transform_product(document(&[("price", SourceValue::from("cheap"))])).unwrap_err();
        assert!(err.contains("price"));
    }

    #[test]
    fn test_transform_user_full_name() {
        let doc = transform_user(document(&[
            ("first_name", SourceValue::from("Ada")),
            ("last_name", SourceValue::from("Lovelace")),
            ("username", SourceValue::from("ada")),
        ]))
        .unwrap();
        assert_eq!(doc["full_name"], SourceValue::from("Ada Lovelace"));

        let doc = transform_user(document(&[("username", SourceValue::from("ada"))])).unwrap();
        assert_eq!(doc["full_name"], SourceValue::from("ADA"));

        let doc = transform_user(RawDocument::new()).unwrap();
        assert_eq!(doc["full_name"], SourceValue::from("Unknown User"));
    }

    #[test]
    fn test_transform_user_defaults() {
        let doc = transform_user(document(&[
            ("roles", SourceValue::from("admin,editor")),
            ("registered_at", SourceValue::from("2025-11-22T10:30:00Z")),
        ]))
        .unwrap();

        assert_eq!(doc["account_type"], SourceValue::from("free"));
        assert_eq!(doc["status"], SourceValue::from("active"));
        assert_eq!(doc["is_verified"], SourceValue::Bool(false));
        assert_eq!(
            doc["roles"],
            SourceValue::Array(vec!["admin".into(), "editor".into()])
        );
        assert_eq!(doc["registered_at"], SourceValue::Int(1763807400));

        let doc = transform_user(RawDocument::new()).unwrap();
        assert_eq!(doc["roles"], SourceValue::Array(vec!["user".into()]));
    }

    #[test]
    fn test_transform_tender_is_identity() {
        let doc = document(&[("title", SourceValue::from("Road works"))]);
        assert_eq!(transform_tender(doc.clone()).unwrap(), doc);
    }
}

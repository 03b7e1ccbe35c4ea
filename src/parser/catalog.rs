use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::error::NormalizationFailure;
use crate::model::{Anomaly, AnomalyKind, EntityKind, Price, Product, Variant};
use crate::parser::text::strip_html;
use crate::scraper::EndpointKind;

/// Products parsed from all catalog pages, deduplicated by id.
pub struct CatalogRecords {
    pub products: Vec<Product>,
    pub anomalies: Vec<Anomaly>,
}

pub fn normalize(pages: &[String]) -> Result<CatalogRecords, NormalizationFailure> {
    let mut products: Vec<Product> = Vec::new();
    // Anomalies tied to a product slot, replaced together with the product on duplicates.
    let mut product_anomalies: Vec<Vec<Anomaly>> = Vec::new();
    let mut position: HashMap<u64, usize> = HashMap::new();
    let mut seen_count: HashMap<u64, usize> = HashMap::new();
    let mut anomalies = Vec::new();
    let mut readable_pages = 0;

    for (page_idx, body) in pages.iter().enumerate() {
        let page_no = page_idx + 1;
        let items = match listed_products(body) {
            Some(items) => items,
            None => {
                anomalies.push(Anomaly::new(
                    EntityKind::Document,
                    format!("catalog page {}", page_no),
                    AnomalyKind::MalformedCatalogPage,
                    "not a JSON object with a `products` array",
                ));
                continue;
            }
        };
        readable_pages += 1;

        for (item_idx, item) in items.iter().enumerate() {
            let Some(id) = item.get("id").and_then(as_id) else {
                anomalies.push(Anomaly::new(
                    EntityKind::Product,
                    format!("page {} item {}", page_no, item_idx + 1),
                    AnomalyKind::MissingId,
                    "catalog item without a usable id skipped",
                ));
                continue;
            };

            let mut item_anomalies = Vec::new();
            let product = parse_product(id, item, &mut item_anomalies);
            *seen_count.entry(id).or_default() += 1;

            match position.get(&id) {
                Some(&pos) => {
                    products[pos] = product;
                    product_anomalies[pos] = item_anomalies;
                }
                None => {
                    position.insert(id, products.len());
                    products.push(product);
                    product_anomalies.push(item_anomalies);
                }
            }
        }
    }

    if readable_pages == 0 {
        return Err(NormalizationFailure::new(
            EndpointKind::Catalog,
            format!("none of {} catalog pages could be read", pages.len()),
        ));
    }

    for (product, own) in products.iter().zip(product_anomalies) {
        anomalies.extend(own);
        if let Some(&count) = seen_count.get(&product.id).filter(|&&c| c > 1) {
            anomalies.push(Anomaly::new(
                EntityKind::Product,
                product.id.to_string(),
                AnomalyKind::DuplicateProduct,
                format!("listed {} times, last listing kept", count),
            ));
        }
    }

    debug!(
        products = products.len(),
        anomalies = anomalies.len(),
        "Normalized catalog"
    );
    Ok(CatalogRecords { products, anomalies })
}

fn listed_products(body: &str) -> Option<Vec<Value>> {
    let mut page: Value = serde_json::from_str(body).ok()?;
    match page.get_mut("products")?.take() {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

fn parse_product(id: u64, item: &Value, anomalies: &mut Vec<Anomaly>) -> Product {
    let title = text_field(item, "title");
    let description_text = strip_html(&text_field(item, "body_html"));
    let tags = parse_tags(item.get("tags"));

    let variants = item
        .get("variants")
        .and_then(Value::as_array)
        .map(|vs| {
            vs.iter()
                .enumerate()
                .map(|(idx, v)| parse_variant(id, idx, v, anomalies))
                .collect()
        })
        .unwrap_or_default();

    let tag_text = tags.join(" ");
    let raw_text = [title.as_str(), description_text.as_str(), tag_text.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Product {
        id,
        handle: text_field(item, "handle"),
        title,
        product_type: text_field(item, "product_type").trim().to_string(),
        vendor: text_field(item, "vendor").trim().to_string(),
        tags,
        variants,
        description_text,
        raw_text,
        collection_ids: Vec::new(),
    }
}

fn parse_variant(product_id: u64, idx: usize, v: &Value, anomalies: &mut Vec<Anomaly>) -> Variant {
    let raw_price = match v.get("price") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let parsed = raw_price.as_deref().and_then(Price::parse);

    let (price, price_coerced) = match parsed {
        Some(p) if !p.is_zero() => (p, false),
        _ => {
            let shown = raw_price.as_deref().unwrap_or("<missing>");
            anomalies.push(Anomaly::new(
                EntityKind::Product,
                product_id.to_string(),
                AnomalyKind::CoercedPrice,
                format!("variant {} price {:?} recorded as 0", idx + 1, shown),
            ));
            (Price::ZERO, true)
        }
    };

    Variant {
        id: v.get("id").and_then(as_id),
        price,
        sku: v
            .get("sku")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
        available: v.get("available").and_then(Value::as_bool),
        price_coerced,
    }
}

/// Tags arrive either as a JSON array or as one comma-separated string.
fn parse_tags(value: Option<&Value>) -> Vec<String> {
    let raw: Vec<String> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(s)) => s.split(',').map(String::from).collect(),
        _ => Vec::new(),
    };

    let mut tags: Vec<String> = Vec::with_capacity(raw.len());
    for tag in raw {
        let tag = tag.trim();
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Numeric ids, also accepted as digit strings.
pub(crate) fn as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn text_field(item: &Value, key: &str) -> String {
    item.get(key).and_then(scalar_text).unwrap_or_default()
}

/// Product ids listed in a `{"products": [...]}` body.
pub(crate) fn listed_product_ids(body: &str) -> Option<Vec<u64>> {
    listed_products(body).map(|items| items.iter().filter_map(|i| i.get("id").and_then(as_id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    #[test]
    fn normalizes_fixture_catalog() {
        let records = normalize(&[fixture("products_page1.json")]).unwrap();
        assert_eq!(records.products.len(), 4);

        let tee = &records.products[0];
        assert_eq!(tee.id, 1001);
        assert_eq!(tee.title, "Organic Cotton Tee");
        assert_eq!(tee.product_type, "T-Shirts");
        assert_eq!(tee.tags, vec!["cotton", "organic", "summer"]);
        assert_eq!(tee.variants.len(), 2);
        assert_eq!(tee.variants[0].price, Price::from_cents(2500));
        assert_eq!(tee.variants[0].sku.as_deref(), Some("TEE-S"));
        assert!(tee.description_text.starts_with("Soft organic cotton"));
        assert!(tee.raw_text.contains("Organic Cotton Tee"));
        assert!(tee.raw_text.contains("summer"));

        // Comma-separated tags and a product without variants.
        let gift = records.products.iter().find(|p| p.id == 1004).unwrap();
        assert_eq!(gift.tags, vec!["gift", "digital"]);
        assert!(gift.variants.is_empty());
        assert_eq!(gift.price_sample(), None);
    }

    #[test]
    fn unreadable_prices_become_zero_with_anomaly() {
        let body = r#"{"products":[
            {"id":1,"title":"A","variants":[{"price":"10.00"}]},
            {"id":2,"title":"B","variants":[{"price":"20.00"}]},
            {"id":3,"title":"C","variants":[{"price":""}]},
            {"id":4,"title":"D","variants":[{"price":"0.00"}]},
            {"id":5,"title":"E","variants":[{"price":"n/a"}]},
            {"id":6,"title":"F","variants":[{"price":12.5}]},
            {"id":7,"title":"G","variants":[{"price":"12.345"}]},
            {"id":8,"title":"H","variants":[{"price":"0.125"}]}
        ]}"#;
        let records = normalize(&[body.to_string()]).unwrap();

        let coerced: Vec<&Anomaly> = records
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::CoercedPrice)
            .collect();
        let ids: Vec<&str> = coerced.iter().map(|a| a.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "4", "5"]);

        let p3 = &records.products[2];
        assert_eq!(p3.variants[0].price, Price::ZERO);
        assert!(p3.variants[0].price_coerced);
        assert_eq!(records.products[5].variants[0].price, Price::from_cents(1250));

        // Three-decimal prices are kept exactly, not coerced.
        let p7 = &records.products[6].variants[0];
        assert!(!p7.price_coerced);
        assert_eq!(p7.price.to_string(), "12.345");
        assert_eq!(records.products[7].variants[0].price.to_string(), "0.125");
    }

    #[test]
    fn duplicates_keep_last_listing_in_first_position() {
        let page1 = r#"{"products":[{"id":7,"title":"Old","variants":[{"price":""}]},{"id":8,"title":"Other"}]}"#;
        let page2 = r#"{"products":[{"id":7,"title":"New","variants":[{"price":"5.00"}]}]}"#;
        let records = normalize(&[page1.to_string(), page2.to_string()]).unwrap();

        assert_eq!(records.products.len(), 2);
        assert_eq!(records.products[0].title, "New");
        assert_eq!(records.products[1].id, 8);
        // The coerced price belonged to the replaced listing.
        assert!(records.anomalies.iter().all(|a| a.kind != AnomalyKind::CoercedPrice));
        let dup: Vec<_> = records
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::DuplicateProduct)
            .collect();
        assert_eq!(dup.len(), 1);
        assert_eq!(dup[0].entity_id, "7");
    }

    #[test]
    fn items_without_id_are_skipped() {
        let body = r#"{"products":[{"title":"no id"},{"id":"42","title":"string id"}]}"#;
        let records = normalize(&[body.to_string()]).unwrap();
        assert_eq!(records.products.len(), 1);
        assert_eq!(records.products[0].id, 42);
        assert_eq!(records.anomalies[0].kind, AnomalyKind::MissingId);
    }

    #[test]
    fn bad_page_is_skipped_but_all_bad_fails() {
        let good = r#"{"products":[{"id":1,"title":"A"}]}"#.to_string();
        let bad = "<html>not json</html>".to_string();

        let records = normalize(&[good, bad.clone()]).unwrap();
        assert_eq!(records.products.len(), 1);
        assert_eq!(records.anomalies[0].kind, AnomalyKind::MalformedCatalogPage);

        let err = normalize(&[bad]).err().unwrap();
        assert_eq!(err.endpoint, EndpointKind::Catalog);
    }
}

use std::collections::HashMap;

use serde_json::Value;

use crate::error::NormalizationFailure;
use crate::model::{Anomaly, AnomalyKind, Collection, EntityKind, ProductId};
use crate::parser::catalog::{as_id, listed_product_ids, text_field};
use crate::scraper::{EndpointKind, MemberListing};

pub struct CollectionRecords {
    pub collections: Vec<Collection>,
    pub anomalies: Vec<Anomaly>,
}

/// Handles listed on one `/collections.json` page, in listing order.
pub fn listed_handles(body: &str) -> Vec<String> {
    listed_collections(body)
        .unwrap_or_default()
        .iter()
        .map(|c| text_field(c, "handle"))
        .filter(|h| !h.is_empty())
        .collect()
}

pub fn normalize(
    pages: &[String],
    members: &[MemberListing],
) -> Result<CollectionRecords, NormalizationFailure> {
    let mut anomalies = Vec::new();
    let mut member_ids: HashMap<&str, Vec<ProductId>> = HashMap::new();

    for listing in members {
        let mut ids = Vec::new();
        let mut readable = false;
        for (page_idx, body) in listing.pages.iter().enumerate() {
            match listed_product_ids(body) {
                Some(page_ids) => {
                    readable = true;
                    ids.extend(page_ids);
                }
                None => anomalies.push(Anomaly::new(
                    EntityKind::Document,
                    format!("collection '{}' products page {}", listing.handle, page_idx + 1),
                    AnomalyKind::MalformedCollectionsPage,
                    "member listing is not a JSON object with a `products` array",
                )),
            }
        }
        if readable {
            member_ids.insert(listing.handle.as_str(), ids);
        }
    }

    let mut collections: Vec<Collection> = Vec::new();
    let mut position: HashMap<u64, usize> = HashMap::new();
    let mut readable_pages = 0;

    for (page_idx, body) in pages.iter().enumerate() {
        let Some(items) = listed_collections(body) else {
            anomalies.push(Anomaly::new(
                EntityKind::Document,
                format!("collections page {}", page_idx + 1),
                AnomalyKind::MalformedCollectionsPage,
                "not a JSON object with a `collections` array",
            ));
            continue;
        };
        readable_pages += 1;

        for (item_idx, item) in items.iter().enumerate() {
            let Some(id) = item.get("id").and_then(as_id) else {
                anomalies.push(Anomaly::new(
                    EntityKind::Collection,
                    format!("page {} item {}", page_idx + 1, item_idx + 1),
                    AnomalyKind::MissingId,
                    "collection without a usable id skipped",
                ));
                continue;
            };
            let collection = parse_collection(id, item, &member_ids, &mut anomalies);
            match position.get(&id) {
                Some(&pos) => collections[pos] = collection,
                None => {
                    position.insert(id, collections.len());
                    collections.push(collection);
                }
            }
        }
    }

    if readable_pages == 0 {
        return Err(NormalizationFailure::new(
            EndpointKind::Collections,
            format!("none of {} collections pages could be read", pages.len()),
        ));
    }

    Ok(CollectionRecords { collections, anomalies })
}

fn listed_collections(body: &str) -> Option<Vec<Value>> {
    let mut page: Value = serde_json::from_str(body).ok()?;
    match page.get_mut("collections")?.take() {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

fn parse_collection(
    id: u64,
    item: &Value,
    member_ids: &HashMap<&str, Vec<ProductId>>,
    anomalies: &mut Vec<Anomaly>,
) -> Collection {
    let handle = text_field(item, "handle");

    let mut product_ids: Vec<ProductId> = item
        .get("product_ids")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(as_id).collect())
        .unwrap_or_default();
    let listed = member_ids.get(handle.as_str());
    for pid in listed.into_iter().flatten() {
        if !product_ids.contains(pid) {
            product_ids.push(*pid);
        }
    }
    let ids_known = listed.is_some() || item.get("product_ids").is_some_and(Value::is_array);

    let explicit_count = item.get("products_count").and_then(as_id);
    let product_count = match explicit_count {
        Some(n) => Some(n),
        None if ids_known => {
            anomalies.push(Anomaly::new(
                EntityKind::Collection,
                id.to_string(),
                AnomalyKind::RecomputedProductCount,
                format!("products_count missing, recomputed as {}", product_ids.len()),
            ));
            Some(product_ids.len() as u64)
        }
        None => None,
    };

    Collection {
        id,
        handle,
        title: text_field(item, "title").trim().to_string(),
        template_suffix: text_field(item, "template_suffix").trim().to_string(),
        product_count,
        product_count_explicit: explicit_count.is_some(),
        members_known: ids_known,
        resolved_product_count: None,
        product_ids,
        unresolved_product_ids: Vec::new(),
    }
}

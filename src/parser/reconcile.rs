use std::collections::HashMap;

use crate::model::{Anomaly, AnomalyKind, Collection, EntityKind, Product};

/// Cross-link collections and products.
///
/// Fills `Product::collection_ids` from collection membership and flags member
/// ids with no matching product. When membership is known, records the
/// resolvable count: a recomputed count is replaced by it, a published count
/// that disagrees with it is flagged.
pub fn reconcile(products: &mut [Product], collections: &mut [Collection]) -> Vec<Anomaly> {
    let index: HashMap<u64, usize> = products
        .iter()
        .enumerate()
        .map(|(idx, p)| (p.id, idx))
        .collect();
    let mut anomalies = Vec::new();

    for collection in collections.iter_mut() {
        collection.unresolved_product_ids.clear();
        for &pid in &collection.product_ids {
            match index.get(&pid) {
                Some(&idx) => {
                    let product = &mut products[idx];
                    if !product.collection_ids.contains(&collection.id) {
                        product.collection_ids.push(collection.id);
                    }
                }
                None => {
                    collection.unresolved_product_ids.push(pid);
                    anomalies.push(Anomaly::new(
                        EntityKind::Collection,
                        collection.id.to_string(),
                        AnomalyKind::UnresolvedProductRef,
                        format!("product {} is not in the catalog", pid),
                    ));
                }
            }
        }

        if !collection.members_known {
            collection.resolved_product_count = None;
            continue;
        }
        let resolved = (collection.product_ids.len() - collection.unresolved_product_ids.len()) as u64;
        collection.resolved_product_count = Some(resolved);
        if !collection.product_count_explicit {
            collection.product_count = Some(resolved);
        } else if let Some(published) = collection.product_count.filter(|&n| n != resolved) {
            anomalies.push(Anomaly::new(
                EntityKind::Collection,
                collection.id.to_string(),
                AnomalyKind::ProductCountMismatch,
                format!("published count {} but {} members resolve", published, resolved),
            ));
        }
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: u64) -> Product {
        Product {
            id,
            handle: format!("p{}", id),
            title: format!("Product {}", id),
            product_type: String::new(),
            vendor: String::new(),
            tags: Vec::new(),
            variants: Vec::new(),
            description_text: String::new(),
            raw_text: String::new(),
            collection_ids: Vec::new(),
        }
    }

    fn collection(id: u64, ids: &[u64], explicit: Option<u64>) -> Collection {
        Collection {
            id,
            handle: format!("c{}", id),
            title: format!("Collection {}", id),
            template_suffix: String::new(),
            product_count: explicit.or(Some(ids.len() as u64)),
            product_count_explicit: explicit.is_some(),
            members_known: true,
            resolved_product_count: None,
            product_ids: ids.to_vec(),
            unresolved_product_ids: Vec::new(),
        }
    }

    #[test]
    fn links_both_directions() {
        let mut products = vec![product(1), product(2), product(3)];
        let mut collections = vec![collection(10, &[1, 2], Some(2)), collection(20, &[2, 3], Some(2))];
        let anomalies = reconcile(&mut products, &mut collections);

        assert!(anomalies.is_empty());
        assert_eq!(products[0].collection_ids, vec![10]);
        assert_eq!(products[1].collection_ids, vec![10, 20]);
        assert_eq!(products[2].collection_ids, vec![20]);
        for c in &collections {
            for pid in &c.product_ids {
                let p = products.iter().find(|p| p.id == *pid).unwrap();
                assert!(p.collection_ids.contains(&c.id));
            }
        }
    }

    #[test]
    fn unresolved_ids_are_flagged() {
        let mut products = vec![product(1)];
        let mut collections = vec![collection(10, &[1, 99], None), collection(20, &[98], Some(1))];
        let anomalies = reconcile(&mut products, &mut collections);

        assert_eq!(collections[0].unresolved_product_ids, vec![99]);
        // Recomputed count keeps only resolvable references.
        assert_eq!(collections[0].product_count, Some(1));
        assert_eq!(collections[0].resolved_product_count, Some(1));
        let unresolved = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::UnresolvedProductRef)
            .count();
        assert_eq!(unresolved, 2);
    }

    #[test]
    fn published_count_mismatch_is_flagged() {
        let mut products = vec![product(1)];
        let mut collections = vec![collection(10, &[1, 42], Some(5)), collection(20, &[1], Some(1))];
        let anomalies = reconcile(&mut products, &mut collections);

        // The published count stays, the resolvable count sits next to it.
        assert_eq!(collections[0].product_count, Some(5));
        assert_eq!(collections[0].resolved_product_count, Some(1));
        let mismatches: Vec<&Anomaly> = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::ProductCountMismatch)
            .collect();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].entity_id, "10");
        assert_eq!(collections[1].resolved_product_count, Some(1));
    }

    #[test]
    fn unknown_membership_is_not_judged() {
        let mut products = vec![product(1)];
        let mut collection = collection(10, &[], Some(5));
        collection.members_known = false;
        let mut collections = vec![collection];
        let anomalies = reconcile(&mut products, &mut collections);

        assert!(anomalies.is_empty());
        assert_eq!(collections[0].resolved_product_count, None);
        assert_eq!(collections[0].product_count, Some(5));
    }
}

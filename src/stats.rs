use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::model::{Collection, Price, Product, SitemapCategory, SitemapEntry};

const UNSPECIFIED: &str = "Unspecified";
const DEFAULT_TEMPLATE: &str = "default";
const SITEMAP_EXAMPLES: usize = 5;
const TOP_COLLECTIONS: usize = 20;

/// Distribution summary. Every aggregate is `None` when there are no values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Population standard deviation.
    pub std_dev: Option<f64>,
    pub p25: Option<f64>,
    pub p75: Option<f64>,
}

impl NumericSummary {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                count: 0,
                min: None,
                max: None,
                mean: None,
                median: None,
                std_dev: None,
                p25: None,
                p75: None,
            };
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            count: sorted.len(),
            min: sorted.first().copied(),
            max: sorted.last().copied(),
            mean: Some(mean),
            median: Some(quantile(&sorted, 0.5)),
            std_dev: Some(variance.sqrt()),
            p25: Some(quantile(&sorted, 0.25)),
            p75: Some(quantile(&sorted, 0.75)),
        }
    }

    pub fn from_prices(prices: &[Price]) -> Self {
        let values: Vec<f64> = prices.iter().map(|p| p.to_f64()).collect();
        Self::from_values(&values)
    }
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frequency {
    pub value: String,
    pub count: usize,
}

/// Counts, most frequent first; ties keep first-seen order.
pub fn frequencies<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<Frequency> {
    let mut counts: Vec<Frequency> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    for value in values {
        match index.get(value) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(value, counts.len());
                counts.push(Frequency { value: value.to_string(), count: 1 });
            }
        }
    }
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

fn or_unspecified(s: &str) -> &str {
    if s.is_empty() {
        UNSPECIFIED
    } else {
        s
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub collection_id: u64,
    pub handle: String,
    pub title: String,
    pub product_count: Option<u64>,
    pub template_suffix: String,
    pub resolved: usize,
    pub unresolved: usize,
    /// Prices of resolved members.
    pub price: NumericSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionRank {
    pub collection_id: u64,
    pub handle: String,
    pub title: String,
    pub product_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub total: usize,
    pub with_explicit_counts: usize,
    /// Largest collections first; collections without a count are left out.
    pub top_by_products: Vec<CollectionRank>,
    /// Template suffix frequency, the default template counted as `default`.
    pub template_suffixes: Vec<Frequency>,
    pub items: Vec<CollectionStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub category: SitemapCategory,
    pub count: usize,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SitemapFootprint {
    pub total_urls: usize,
    pub by_category: Vec<CategoryCount>,
    pub latest_lastmod: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_products: usize,
    pub priced_products: usize,
    pub zero_priced_products: usize,
    pub products_without_variants: usize,
    pub price: NumericSummary,
    pub title_length: NumericSummary,
    pub description_length: NumericSummary,
    pub product_types: Vec<Frequency>,
    pub tags: Vec<Frequency>,
    pub vendors: Vec<Frequency>,
    pub collections: CollectionSummary,
    pub sitemap: SitemapFootprint,
}

pub fn analyze(products: &[Product], collections: &[Collection], entries: &[SitemapEntry]) -> Statistics {
    let prices: Vec<Price> = products.iter().filter_map(Product::positive_price).collect();
    let zero_priced_products = products
        .iter()
        .filter(|p| p.price_sample().is_some_and(Price::is_zero))
        .count();

    let title_lengths: Vec<f64> = products.iter().map(|p| p.title.chars().count() as f64).collect();
    let description_lengths: Vec<f64> = products
        .iter()
        .map(|p| p.description_text.chars().count() as f64)
        .collect();

    Statistics {
        total_products: products.len(),
        priced_products: prices.len(),
        zero_priced_products,
        products_without_variants: products.iter().filter(|p| p.variants.is_empty()).count(),
        price: NumericSummary::from_prices(&prices),
        title_length: NumericSummary::from_values(&title_lengths),
        description_length: NumericSummary::from_values(&description_lengths),
        product_types: frequencies(products.iter().map(|p| or_unspecified(&p.product_type))),
        tags: frequencies(products.iter().flat_map(|p| p.tags.iter().map(String::as_str))),
        vendors: frequencies(products.iter().map(|p| or_unspecified(&p.vendor))),
        collections: summarize_collections(products, collections),
        sitemap: footprint(entries),
    }
}

fn summarize_collections(products: &[Product], collections: &[Collection]) -> CollectionSummary {
    let by_id: HashMap<u64, &Product> = products.iter().map(|p| (p.id, p)).collect();

    let items = collections
        .iter()
        .map(|c| {
            let members: Vec<&Product> = c.product_ids.iter().filter_map(|id| by_id.get(id).copied()).collect();
            let prices: Vec<Price> = members.iter().filter_map(|p| p.positive_price()).collect();
            CollectionStats {
                collection_id: c.id,
                handle: c.handle.clone(),
                title: c.title.clone(),
                product_count: c.product_count,
                template_suffix: c.template_suffix.clone(),
                resolved: members.len(),
                unresolved: c.unresolved_product_ids.len(),
                price: NumericSummary::from_prices(&prices),
            }
        })
        .collect();

    let mut ranked: Vec<CollectionRank> = collections
        .iter()
        .filter_map(|c| {
            Some(CollectionRank {
                collection_id: c.id,
                handle: c.handle.clone(),
                title: c.title.clone(),
                product_count: c.product_count?,
            })
        })
        .collect();
    // Stable sort: equal counts keep listing order.
    ranked.sort_by(|a, b| b.product_count.cmp(&a.product_count));
    ranked.truncate(TOP_COLLECTIONS);

    CollectionSummary {
        total: collections.len(),
        with_explicit_counts: collections.iter().filter(|c| c.product_count_explicit).count(),
        top_by_products: ranked,
        template_suffixes: frequencies(collections.iter().map(|c| {
            if c.template_suffix.is_empty() {
                DEFAULT_TEMPLATE
            } else {
                c.template_suffix.as_str()
            }
        })),
        items,
    }
}

fn footprint(entries: &[SitemapEntry]) -> SitemapFootprint {
    let by_category = SitemapCategory::ALL
        .iter()
        .map(|&category| {
            let matching = entries.iter().filter(|e| e.category == category);
            CategoryCount {
                category,
                count: matching.clone().count(),
                examples: matching.take(SITEMAP_EXAMPLES).map(|e| e.url.clone()).collect(),
            }
        })
        .collect();

    let latest_lastmod = entries
        .iter()
        .filter_map(|e| {
            let raw = e.last_modified.as_deref()?;
            parse_lastmod(raw).map(|at| (at, raw))
        })
        .max_by_key(|(at, _)| *at)
        .map(|(_, raw)| raw.to_string());

    SitemapFootprint {
        total_urls: entries.len(),
        by_category,
        latest_lastmod,
    }
}

/// W3C datetime as used by sitemaps: full RFC 3339 or a bare date.
fn parse_lastmod(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

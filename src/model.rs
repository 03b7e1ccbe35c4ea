use std::fmt;

use serde::{Serialize, Serializer};

pub type ProductId = u64;
pub type CollectionId = u64;

/// Fractional digits every price carries at least.
const MIN_SCALE: u32 = 2;
/// Largest scale whose power of ten still fits in `u64`.
const MAX_SCALE: u32 = 18;

/// Exact non-negative decimal price: `minor / 10^scale`.
///
/// Kept normalized (at least two fractional digits, no trailing zeros past the
/// second) so equal amounts are equal field by field: `"4.9900"` and `"4.99"`
/// both hold `499` at scale 2, while `"12.345"` holds `12345` at scale 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Price {
    minor: u64,
    scale: u32,
}

impl Price {
    pub const ZERO: Price = Price { minor: 0, scale: MIN_SCALE };

    #[cfg(test)]
    pub fn from_cents(cents: u64) -> Self {
        Price { minor: cents, scale: MIN_SCALE }
    }

    /// Amount in units of `10^-scale`.
    pub fn minor_units(self) -> u64 {
        self.minor
    }

    pub fn scale(self) -> u32 {
        self.scale
    }

    pub fn is_zero(self) -> bool {
        self.minor == 0
    }

    pub fn to_f64(self) -> f64 {
        self.minor as f64 / 10f64.powi(self.scale as i32)
    }

    /// Parse a plain decimal string such as `"19.99"`, `"20"`, `"7.5"` or `"12.345"`.
    ///
    /// Returns `None` for empty, signed, non-numeric or overflowing input. Every
    /// accepted value is held exactly.
    pub fn parse(raw: &str) -> Option<Price> {
        let s = raw.trim();
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !frac_part.bytes().all(|b| b.is_ascii_digit()) || s.ends_with('.') {
            return None;
        }

        let significant = frac_part.trim_end_matches('0');
        let scale = (significant.len() as u32).max(MIN_SCALE);
        if scale > MAX_SCALE {
            return None;
        }
        let whole: u64 = int_part.parse().ok()?;
        let frac: u64 = if significant.is_empty() { 0 } else { significant.parse().ok()? };
        let frac = frac.checked_mul(10u64.pow(scale - significant.len() as u32))?;
        whole
            .checked_mul(10u64.pow(scale))?
            .checked_add(frac)
            .map(|minor| Price { minor, scale })
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = 10u64.pow(self.scale);
        write!(
            f,
            "{}.{:0width$}",
            self.minor / unit,
            self.minor % unit,
            width = self.scale as usize
        )
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    pub id: Option<u64>,
    pub price: Price,
    pub sku: Option<String>,
    pub available: Option<bool>,
    /// Set when the source price was missing or unreadable and replaced by 0.
    pub price_coerced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub handle: String,
    pub title: String,
    pub product_type: String,
    pub vendor: String,
    pub tags: Vec<String>,
    pub variants: Vec<Variant>,
    pub description_text: String,
    pub raw_text: String,
    pub collection_ids: Vec<CollectionId>,
}

impl Product {
    /// Price used for statistics: the first variant's price, if there is one.
    pub fn price_sample(&self) -> Option<Price> {
        self.variants.first().map(|v| v.price)
    }

    /// Price sample that counts toward distributions (non-zero only).
    pub fn positive_price(&self) -> Option<Price> {
        self.price_sample().filter(|p| !p.is_zero())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub id: CollectionId,
    pub handle: String,
    pub title: String,
    /// Empty when the collection uses the default template.
    pub template_suffix: String,
    /// Published count, or recomputed from member ids when the store gave none.
    pub product_count: Option<u64>,
    /// Whether `product_count` came from the source rather than being recomputed.
    pub product_count_explicit: bool,
    /// Set when member ids were listed, so `product_ids` is the full membership.
    pub members_known: bool,
    /// Member ids that resolve to a catalog product; set by reconciliation.
    pub resolved_product_count: Option<u64>,
    pub product_ids: Vec<ProductId>,
    pub unresolved_product_ids: Vec<ProductId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SitemapCategory {
    Product,
    Collection,
    Page,
    Blog,
    Unknown,
}

impl SitemapCategory {
    pub const ALL: [SitemapCategory; 5] = [
        SitemapCategory::Product,
        SitemapCategory::Collection,
        SitemapCategory::Page,
        SitemapCategory::Blog,
        SitemapCategory::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SitemapCategory::Product => "product",
            SitemapCategory::Collection => "collection",
            SitemapCategory::Page => "page",
            SitemapCategory::Blog => "blog",
            SitemapCategory::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SitemapEntry {
    pub url: String,
    pub category: SitemapCategory,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Platform,
    App,
    Pixel,
    Theme,
}

impl SignalCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalCategory::Platform => "platform",
            SignalCategory::App => "app",
            SignalCategory::Pixel => "pixel",
            SignalCategory::Theme => "theme",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechSignal {
    pub name: String,
    pub category: SignalCategory,
    pub evidence_snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub cluster_id: usize,
    pub member_product_ids: Vec<ProductId>,
    pub centroid_terms: Vec<String>,
    pub avg_price: Option<f64>,
    pub size: usize,
    pub top_product_types: Vec<(String, usize)>,
    pub example_titles: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Collection,
    SitemapEntry,
    Document,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Collection => "collection",
            EntityKind::SitemapEntry => "sitemap_entry",
            EntityKind::Document => "document",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    CoercedPrice,
    DuplicateProduct,
    MissingId,
    MalformedCatalogPage,
    MalformedCollectionsPage,
    MalformedSitemapEntry,
    MalformedSitemapDocument,
    UnresolvedProductRef,
    RecomputedProductCount,
    ProductCountMismatch,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyKind::CoercedPrice => "coerced_price",
            AnomalyKind::DuplicateProduct => "duplicate_product",
            AnomalyKind::MissingId => "missing_id",
            AnomalyKind::MalformedCatalogPage => "malformed_catalog_page",
            AnomalyKind::MalformedCollectionsPage => "malformed_collections_page",
            AnomalyKind::MalformedSitemapEntry => "malformed_sitemap_entry",
            AnomalyKind::MalformedSitemapDocument => "malformed_sitemap_document",
            AnomalyKind::UnresolvedProductRef => "unresolved_product_ref",
            AnomalyKind::RecomputedProductCount => "recomputed_product_count",
            AnomalyKind::ProductCountMismatch => "product_count_mismatch",
        }
    }
}

/// Non-fatal data quality issue found while normalizing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub entity: EntityKind,
    pub entity_id: String,
    pub kind: AnomalyKind,
    pub detail: String,
}

impl Anomaly {
    pub fn new(
        entity: EntityKind,
        entity_id: impl Into<String>,
        kind: AnomalyKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            entity,
            entity_id: entity_id.into(),
            kind,
            detail: detail.into(),
        }
    }
}

pub mod catalog;
pub mod collections;
pub mod homepage;
pub mod reconcile;
pub mod sitemap;
pub mod text;

use crate::error::NormalizationFailure;
use crate::model::{Anomaly, Collection, Product, SitemapEntry, TechSignal};
use crate::scraper::RawPayload;

/// Typed records for one endpoint, mirroring the payload variant they came from.
#[derive(Debug)]
pub enum NormalizedRecords {
    Catalog { products: Vec<Product>, anomalies: Vec<Anomaly> },
    Collections { collections: Vec<Collection>, anomalies: Vec<Anomaly> },
    Sitemap { entries: Vec<SitemapEntry>, anomalies: Vec<Anomaly> },
    Homepage { signals: Vec<TechSignal> },
}

impl NormalizedRecords {
    pub fn anomalies(&self) -> &[Anomaly] {
        match self {
            NormalizedRecords::Catalog { anomalies, .. }
            | NormalizedRecords::Collections { anomalies, .. }
            | NormalizedRecords::Sitemap { anomalies, .. } => anomalies,
            NormalizedRecords::Homepage { .. } => &[],
        }
    }

    pub fn record_count(&self) -> usize {
        match self {
            NormalizedRecords::Catalog { products, .. } => products.len(),
            NormalizedRecords::Collections { collections, .. } => collections.len(),
            NormalizedRecords::Sitemap { entries, .. } => entries.len(),
            NormalizedRecords::Homepage { signals } => signals.len(),
        }
    }
}

/// Parse a raw payload into records. No I/O.
pub fn normalize(payload: &RawPayload) -> Result<NormalizedRecords, NormalizationFailure> {
    match payload {
        RawPayload::Catalog { pages } => {
            let records = catalog::normalize(pages)?;
            Ok(NormalizedRecords::Catalog {
                products: records.products,
                anomalies: records.anomalies,
            })
        }
        RawPayload::Collections { pages, members } => {
            let records = collections::normalize(pages, members)?;
            Ok(NormalizedRecords::Collections {
                collections: records.collections,
                anomalies: records.anomalies,
            })
        }
        RawPayload::Sitemap { documents } => {
            let records = sitemap::normalize(documents)?;
            Ok(NormalizedRecords::Sitemap {
                entries: records.entries,
                anomalies: records.anomalies,
            })
        }
        RawPayload::Homepage { html } => Ok(NormalizedRecords::Homepage {
            signals: homepage::detect(html),
        }),
    }
}

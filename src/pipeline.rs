use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cluster::{self, ClusterOutcome, ClusterParams};
use crate::error::{FatalRunFailure, FetchFailure, NormalizationFailure};
use crate::model::{Anomaly, Collection, Product, SitemapEntry, TechSignal};
use crate::parser::{self, reconcile::reconcile, NormalizedRecords};
use crate::scraper::{EndpointKind, Fetched, Fetcher, RawPayload, StoreRoot};
use crate::stats::{self, Statistics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    Success,
    /// Endpoint data is missing from the profile; the run went on without it.
    Gap,
    Fatal,
}

impl EndpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointStatus::Success => "success",
            EndpointStatus::Gap => "gap",
            EndpointStatus::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointReport {
    pub endpoint: EndpointKind,
    pub status: EndpointStatus,
    pub url: String,
    /// HTTP requests made; unknown when the fetch failed.
    pub requests: Option<u32>,
    pub documents: usize,
    pub records: usize,
    pub detail: Option<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    PartialSuccess,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::PartialSuccess => "partial_success",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Store {
    pub slug: String,
    pub root_url: String,
}

/// Everything learned about one store in one run.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub store: Store,
    pub fetched_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub endpoints: Vec<EndpointReport>,
    pub statistics: Statistics,
    pub clustering: ClusterOutcome,
    pub tech_signals: Vec<TechSignal>,
    pub products: Vec<Product>,
    pub collections: Vec<Collection>,
    pub sitemap_entries: Vec<SitemapEntry>,
    pub diagnostics: Vec<Anomaly>,
}

impl Profile {
    /// Compact overview printed at the end of a run.
    pub fn summary(&self) -> serde_json::Value {
        let stats = &self.statistics;
        json!({
            "store": self.store.root_url,
            "outcome": self.outcome,
            "products": stats.total_products,
            "collections": stats.collections.total,
            "sitemap_urls": stats.sitemap.total_urls,
            "price": stats.price,
            "top_product_types": stats.product_types.iter().take(5).collect::<Vec<_>>(),
            "top_tags": stats.tags.iter().take(10).collect::<Vec<_>>(),
            "endpoints": self
                .endpoints
                .iter()
                .map(|e| json!({ "endpoint": e.endpoint, "status": e.status }))
                .collect::<Vec<_>>(),
            "clusters": self
                .clustering
                .clusters()
                .iter()
                .map(|c| json!({
                    "cluster_id": c.cluster_id,
                    "size": c.size,
                    "label": c.centroid_terms.join(" "),
                }))
                .collect::<Vec<_>>(),
            "tech": self.tech_signals.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "anomalies": self.diagnostics.len(),
        })
    }
}

/// A finished run: the profile plus raw material kept alongside it.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub profile: Profile,
    pub homepage_html: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Treat a missing catalog as fatal instead of profiling collections only.
    pub catalog_required: bool,
    pub cluster: ClusterParams,
}

/// A fatal run, with what each endpoint returned before the run was abandoned.
#[derive(Debug, Error)]
#[error("{failure}")]
pub struct RunFailure {
    pub failure: FatalRunFailure,
    pub endpoints: Vec<EndpointReport>,
}

enum GapCause {
    Fetch(FetchFailure),
    Normalize(NormalizationFailure),
}

enum Settled {
    Records(NormalizedRecords),
    Gap(GapCause),
}

/// Fetch, normalize, analyze and cluster one store.
pub async fn run(fetcher: &Fetcher, root: &StoreRoot, options: &RunOptions) -> Result<RunArtifacts, RunFailure> {
    let fetched_at = Utc::now();
    info!("Profiling {}", root);

    let pb = ProgressBar::new(EndpointKind::ALL.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    let tracked = |kind: EndpointKind| {
        let pb = pb.clone();
        async move {
            let result = fetcher.fetch(root, kind).await;
            pb.set_message(kind.as_str());
            pb.inc(1);
            result
        }
    };

    let (catalog, collections, sitemap, homepage) = tokio::join!(
        tracked(EndpointKind::Catalog),
        tracked(EndpointKind::Collections),
        tracked(EndpointKind::Sitemap),
        tracked(EndpointKind::Homepage),
    );
    pb.finish_and_clear();

    let homepage_html = match &homepage {
        Ok(Fetched { payload: RawPayload::Homepage { html }, .. }) => Some(html.clone()),
        _ => None,
    };

    let mut endpoints = Vec::with_capacity(EndpointKind::ALL.len());
    let mut products = Vec::new();
    let mut collection_records = Vec::new();
    let mut sitemap_entries = Vec::new();
    let mut tech_signals = Vec::new();
    let mut diagnostics = Vec::new();
    let mut catalog_gap = None;

    let results = [
        (EndpointKind::Catalog, catalog),
        (EndpointKind::Collections, collections),
        (EndpointKind::Sitemap, sitemap),
        (EndpointKind::Homepage, homepage),
    ];
    for (kind, result) in results {
        let (report, settled) = settle(kind, result);
        endpoints.push(report);
        match settled {
            Settled::Records(NormalizedRecords::Catalog { products: p, anomalies }) => {
                products = p;
                diagnostics.extend(anomalies);
            }
            Settled::Records(NormalizedRecords::Collections { collections: c, anomalies }) => {
                collection_records = c;
                diagnostics.extend(anomalies);
            }
            Settled::Records(NormalizedRecords::Sitemap { entries, anomalies }) => {
                sitemap_entries = entries;
                diagnostics.extend(anomalies);
            }
            Settled::Records(NormalizedRecords::Homepage { signals }) => tech_signals = signals,
            Settled::Gap(cause) if kind == EndpointKind::Catalog => catalog_gap = Some(cause),
            Settled::Gap(_) => {}
        }
    }

    let catalog_available = catalog_gap.is_none();
    if let Some(cause) = catalog_gap {
        if options.catalog_required {
            if let Some(report) = endpoints.iter_mut().find(|e| e.endpoint == EndpointKind::Catalog) {
                report.status = EndpointStatus::Fatal;
            }
            let failure = match cause {
                GapCause::Fetch(f) => FatalRunFailure::CatalogUnreachable(f),
                GapCause::Normalize(n) => FatalRunFailure::CatalogUnreadable(n),
            };
            error!("Run abandoned: {}", failure);
            return Err(RunFailure { failure, endpoints });
        }
        warn!("Catalog unavailable, continuing with collections only");
    }

    if catalog_available {
        diagnostics.extend(reconcile(&mut products, &mut collection_records));
    }

    let statistics = stats::analyze(&products, &collection_records, &sitemap_entries);
    let clustering = cluster::cluster(&products, &options.cluster);
    if let ClusterOutcome::Skipped { reason } = &clustering {
        info!("Clustering skipped: {}", reason);
    }

    let outcome = if endpoints.iter().any(|e| e.status == EndpointStatus::Gap) {
        RunOutcome::PartialSuccess
    } else {
        RunOutcome::Success
    };
    info!(
        products = products.len(),
        collections = collection_records.len(),
        sitemap_urls = sitemap_entries.len(),
        anomalies = diagnostics.len(),
        "Run finished: {}",
        outcome.as_str()
    );

    Ok(RunArtifacts {
        profile: Profile {
            store: Store { slug: root.slug(), root_url: root.as_str().to_string() },
            fetched_at,
            outcome,
            endpoints,
            statistics,
            clustering,
            tech_signals,
            products,
            collections: collection_records,
            sitemap_entries,
            diagnostics,
        },
        homepage_html,
    })
}

fn settle(kind: EndpointKind, result: Result<Fetched, FetchFailure>) -> (EndpointReport, Settled) {
    let fetched = match result {
        Ok(fetched) => fetched,
        Err(failure) => {
            warn!(
                endpoint = %kind,
                status = ?failure.status(),
                transient = failure.is_transient(),
                "Fetch failed: {}",
                failure
            );
            let report = EndpointReport {
                endpoint: kind,
                status: EndpointStatus::Gap,
                url: failure.url().to_string(),
                requests: None,
                documents: 0,
                records: 0,
                detail: Some(failure.to_string()),
                notes: Vec::new(),
            };
            return (report, Settled::Gap(GapCause::Fetch(failure)));
        }
    };

    let mut report = EndpointReport {
        endpoint: kind,
        status: EndpointStatus::Success,
        url: fetched.url,
        requests: Some(fetched.requests),
        documents: fetched.payload.document_count(),
        records: 0,
        detail: None,
        notes: fetched.notes,
    };

    match parser::normalize(&fetched.payload) {
        Ok(records) => {
            report.records = records.record_count();
            if !records.anomalies().is_empty() {
                info!(endpoint = %kind, "{} anomalies while normalizing", records.anomalies().len());
            }
            (report, Settled::Records(records))
        }
        Err(failure) => {
            warn!(endpoint = %kind, "Normalization failed: {}", failure);
            report.status = EndpointStatus::Gap;
            report.detail = Some(failure.to_string());
            (report, Settled::Gap(GapCause::Normalize(failure)))
        }
    }
}

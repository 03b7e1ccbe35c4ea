pub mod kmeans;
pub mod tfidf;

use std::cmp::Ordering;

use serde::Serialize;
use tracing::{debug, info};

use crate::model::{Cluster, Price, Product};
use crate::stats::frequencies;

/// Terms must appear in at least this many products to enter the vocabulary.
const MIN_DOCUMENT_FREQUENCY: usize = 2;
const TOP_PRODUCT_TYPES: usize = 3;
const EXAMPLE_TITLES: usize = 5;

#[derive(Debug, Clone)]
pub struct ClusterParams {
    /// Requested cluster count; derived from the product count when `None`.
    pub k: Option<usize>,
    pub seed: u64,
    pub max_iterations: usize,
    pub top_terms: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClusterOutcome {
    Clustered { k: usize, clusters: Vec<Cluster> },
    Skipped { reason: String },
}

impl ClusterOutcome {
    pub fn clusters(&self) -> &[Cluster] {
        match self {
            ClusterOutcome::Clustered { clusters, .. } => clusters,
            ClusterOutcome::Skipped { .. } => &[],
        }
    }
}

/// `n / 30`, kept within 2..=10.
pub fn default_k(n: usize) -> usize {
    (n / 30).clamp(2, 10)
}

/// Group products by TF-IDF similarity of their text.
pub fn cluster(products: &[Product], params: &ClusterParams) -> ClusterOutcome {
    let n = products.len();
    if n < 2 {
        return ClusterOutcome::Skipped {
            reason: format!("need at least 2 products to cluster, got {}", n),
        };
    }
    let k = params.k.unwrap_or_else(|| default_k(n)).clamp(1, n);

    let documents: Vec<&str> = products.iter().map(|p| p.raw_text.as_str()).collect();
    let tfidf = tfidf::vectorize(&documents, MIN_DOCUMENT_FREQUENCY);
    debug!(products = n, vocabulary = tfidf.terms.len(), "Vectorized product text");

    let fit = kmeans::fit(&tfidf.vectors, tfidf.terms.len(), k, params.seed, params.max_iterations);
    info!(k, iterations = fit.iterations, "Clustered {} products", n);

    let clusters = (0..k)
        .map(|cluster_id| {
            let members: Vec<&Product> = products
                .iter()
                .zip(&fit.assignments)
                .filter(|&(_, &a)| a == cluster_id)
                .map(|(p, _)| p)
                .collect();
            describe(cluster_id, &members, &fit.centroids[cluster_id], &tfidf.terms, params.top_terms)
        })
        .collect();

    ClusterOutcome::Clustered { k, clusters }
}

fn describe(
    cluster_id: usize,
    members: &[&Product],
    centroid: &[f64],
    terms: &[String],
    top_terms: usize,
) -> Cluster {
    let prices: Vec<Price> = members.iter().filter_map(|p| p.positive_price()).collect();
    let avg_price = if prices.is_empty() {
        None
    } else {
        let total: f64 = prices.iter().map(|p| p.to_f64()).sum();
        Some(total / prices.len() as f64)
    };

    let mut weighted: Vec<(usize, f64)> = centroid
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, w)| w > 0.0)
        .collect();
    weighted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| terms[a.0].cmp(&terms[b.0]))
    });

    let top_product_types = frequencies(members.iter().map(|p| p.product_type.as_str()).filter(|t| !t.is_empty()))
        .into_iter()
        .take(TOP_PRODUCT_TYPES)
        .map(|f| (f.value, f.count))
        .collect();

    Cluster {
        cluster_id,
        member_product_ids: members.iter().map(|p| p.id).collect(),
        centroid_terms: weighted
            .into_iter()
            .take(top_terms)
            .map(|(i, _)| terms[i].clone())
            .collect(),
        avg_price,
        size: members.len(),
        top_product_types,
        example_titles: members.iter().take(EXAMPLE_TITLES).map(|p| p.title.clone()).collect(),
    }
}

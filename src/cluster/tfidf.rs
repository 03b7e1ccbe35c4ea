use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::prelude::*;

/// Terms that carry no topical signal in product copy.
const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "do", "each", "for", "from", "get", "has", "have", "how", "if", "in",
    "into", "is", "it", "its", "just", "more", "most", "no", "not", "of", "on", "one", "or",
    "our", "out", "over", "so", "some", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "to", "up", "us", "was", "we", "were", "what", "when", "which",
    "while", "who", "will", "with", "you", "your",
];

/// Lowercased alphanumeric terms of `text`, minus stop words, pure numbers and
/// single characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOP_WORDS.contains(t))
        .map(String::from)
        .collect()
}

/// Sparse, L2-normalized document vector: `(term index, weight)` sorted by index.
pub type SparseVector = Vec<(usize, f64)>;

pub struct TfIdf {
    /// Sorted vocabulary; a term's position is its vector index.
    pub terms: Vec<String>,
    pub vectors: Vec<SparseVector>,
}

/// Vectorize documents over the terms that occur in at least `min_df` of them.
pub fn vectorize(documents: &[&str], min_df: usize) -> TfIdf {
    let token_lists: Vec<Vec<String>> = documents.par_iter().map(|d| tokenize(d)).collect();

    let mut df: BTreeMap<&str, usize> = BTreeMap::new();
    for tokens in &token_lists {
        let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        for term in unique {
            *df.entry(term).or_default() += 1;
        }
    }
    df.retain(|_, count| *count >= min_df);

    let n = documents.len() as f64;
    let terms: Vec<String> = df.keys().map(|t| t.to_string()).collect();
    let index: HashMap<&str, usize> = df.keys().enumerate().map(|(i, t)| (*t, i)).collect();
    let idf: Vec<f64> = df
        .values()
        .map(|&count| ((1.0 + n) / (1.0 + count as f64)).ln() + 1.0)
        .collect();

    let vectors = token_lists
        .par_iter()
        .map(|tokens| weigh(tokens, &index, &idf))
        .collect();

    TfIdf { terms, vectors }
}

fn weigh(tokens: &[String], index: &HashMap<&str, usize>, idf: &[f64]) -> SparseVector {
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for token in tokens {
        if let Some(&i) = index.get(token.as_str()) {
            *counts.entry(i).or_default() += 1;
        }
    }

    let len = tokens.len() as f64;
    let mut vector: SparseVector = counts
        .into_iter()
        .map(|(i, count)| (i, count as f64 / len * idf[i]))
        .collect();

    let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for (_, w) in &mut vector {
            *w /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_drops_noise() {
        assert_eq!(
            tokenize("The Organic-Cotton tee, 100% soft & a 2-pack for YOU"),
            vec!["organic", "cotton", "tee", "soft", "pack"]
        );
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn vocabulary_needs_two_documents() {
        let docs = ["cotton tee shirt", "cotton hoodie", "ceramic mug"];
        let tfidf = vectorize(&docs, 2);
        assert_eq!(tfidf.terms, vec!["cotton"]);
        assert_eq!(tfidf.vectors[0].len(), 1);
        assert!((tfidf.vectors[0][0].1 - 1.0).abs() < 1e-12);
        assert!(tfidf.vectors[2].is_empty());
    }

    #[test]
    fn vectors_are_unit_length() {
        let docs = ["linen shirt summer", "linen dress summer", "summer hat straw", "straw hat"];
        let tfidf = vectorize(&docs, 2);
        assert_eq!(tfidf.terms, vec!["hat", "linen", "straw", "summer"]);
        for v in &tfidf.vectors {
            let norm: f64 = v.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }
}

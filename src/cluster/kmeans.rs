//! k-means over sparse unit vectors with k-means++ seeding.
//!
//! Squared Euclidean distance on L2-normalized vectors orders points the same
//! way cosine distance does. Every step is deterministic for a given seed:
//! ties go to the lowest index and the only randomness is the seeded RNG used
//! during seeding.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::tfidf::SparseVector;

#[derive(Debug, Clone, PartialEq)]
pub struct KMeans {
    /// Cluster index per input vector.
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub iterations: usize,
}

/// Partition `vectors` into exactly `k` non-empty groups. Requires `1 <= k <= vectors.len()`.
pub fn fit(vectors: &[SparseVector], dims: usize, k: usize, seed: u64, max_iterations: usize) -> KMeans {
    let mut centroids = seed_centroids(vectors, dims, k, seed);
    let mut assignments: Vec<usize> = Vec::new();
    let mut iterations = 0;

    for _ in 0..max_iterations.max(1) {
        let norms: Vec<f64> = centroids.iter().map(|c| squared_norm(c)).collect();
        let mut next: Vec<usize> = vectors
            .par_iter()
            .map(|v| nearest(v, &centroids, &norms).0)
            .collect();
        refill_empty(&mut next, vectors, &centroids, k);

        let changed = next != assignments;
        assignments = next;
        centroids = recompute(vectors, &assignments, k, dims);
        iterations += 1;
        if !changed {
            break;
        }
    }

    KMeans { assignments, centroids, iterations }
}

fn seed_centroids(vectors: &[SparseVector], dims: usize, k: usize, seed: u64) -> Vec<Vec<f64>> {
    let n = vectors.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let first = rng.gen_range(0..n);
    let mut chosen = vec![first];
    let mut centroids = vec![to_dense(&vectors[first], dims)];

    while centroids.len() < k {
        let norms: Vec<f64> = centroids.iter().map(|c| squared_norm(c)).collect();
        let weights: Vec<f64> = vectors.iter().map(|v| nearest(v, &centroids, &norms).1).collect();
        let total: f64 = weights.iter().sum();

        let next = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = None;
            for (i, &w) in weights.iter().enumerate() {
                if w <= 0.0 {
                    continue;
                }
                if target < w {
                    pick = Some(i);
                    break;
                }
                target -= w;
            }
            pick.or_else(|| weights.iter().rposition(|&w| w > 0.0)).unwrap_or(0)
        } else {
            // All remaining points coincide with a centroid.
            (0..n).find(|i| !chosen.contains(i)).unwrap_or(0)
        };

        chosen.push(next);
        centroids.push(to_dense(&vectors[next], dims));
    }
    centroids
}

/// Move the farthest member of the largest cluster into each empty cluster.
fn refill_empty(assignments: &mut [usize], vectors: &[SparseVector], centroids: &[Vec<f64>], k: usize) {
    loop {
        let mut sizes = vec![0usize; k];
        for &a in assignments.iter() {
            sizes[a] += 1;
        }
        let Some(empty) = sizes.iter().position(|&s| s == 0) else { return };

        let mut largest = 0;
        for c in 1..k {
            if sizes[c] > sizes[largest] {
                largest = c;
            }
        }
        if sizes[largest] < 2 {
            return;
        }

        let norm = squared_norm(&centroids[largest]);
        let mut farthest: Option<(usize, f64)> = None;
        for (i, v) in vectors.iter().enumerate() {
            if assignments[i] != largest {
                continue;
            }
            let d = distance(v, &centroids[largest], norm);
            if farthest.map_or(true, |(_, best)| d > best) {
                farthest = Some((i, d));
            }
        }
        match farthest {
            Some((i, _)) => assignments[i] = empty,
            None => return,
        }
    }
}

fn recompute(vectors: &[SparseVector], assignments: &[usize], k: usize, dims: usize) -> Vec<Vec<f64>> {
    let mut sums = vec![vec![0.0; dims]; k];
    let mut sizes = vec![0usize; k];
    for (v, &a) in vectors.iter().zip(assignments) {
        sizes[a] += 1;
        for &(i, w) in v {
            sums[a][i] += w;
        }
    }
    for (sum, &size) in sums.iter_mut().zip(&sizes) {
        if size > 0 {
            for x in sum.iter_mut() {
                *x /= size as f64;
            }
        }
    }
    sums
}

/// Index of and distance to the closest centroid; ties go to the lower index.
fn nearest(v: &SparseVector, centroids: &[Vec<f64>], norms: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, (centroid, &norm)) in centroids.iter().zip(norms).enumerate() {
        let d = distance(v, centroid, norm);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// Squared Euclidean distance between a sparse vector and a dense centroid.
fn distance(v: &SparseVector, centroid: &[f64], centroid_norm: f64) -> f64 {
    let mut d = centroid_norm;
    for &(i, w) in v {
        d += w * w - 2.0 * w * centroid[i];
    }
    d.max(0.0)
}

fn squared_norm(c: &[f64]) -> f64 {
    c.iter().map(|x| x * x).sum()
}

fn to_dense(v: &SparseVector, dims: usize) -> Vec<f64> {
    let mut dense = vec![0.0; dims];
    for &(i, w) in v {
        dense[i] = w;
    }
    dense
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_groups() -> Vec<SparseVector> {
        vec![
            vec![(0, 1.0)],
            vec![(0, 0.9), (1, 0.435_889_894)],
            vec![(2, 1.0)],
            vec![(2, 0.9), (3, 0.435_889_894)],
            vec![(0, 0.95), (1, 0.312_249_9)],
        ]
    }

    #[test]
    fn separates_obvious_groups() {
        let result = fit(&two_groups(), 4, 2, 7, 50);
        let a = result.assignments[0];
        assert_eq!(result.assignments[1], a);
        assert_eq!(result.assignments[4], a);
        assert_ne!(result.assignments[2], a);
        assert_eq!(result.assignments[3], result.assignments[2]);
    }

    #[test]
    fn same_seed_same_partition() {
        let vectors = two_groups();
        for seed in [0, 1, 42, 9_999] {
            assert_eq!(fit(&vectors, 4, 3, seed, 50), fit(&vectors, 4, 3, seed, 50));
        }
    }

    #[test]
    fn identical_points_still_fill_every_cluster() {
        let vectors = vec![vec![(0, 1.0)]; 4];
        let result = fit(&vectors, 1, 3, 1, 10);
        let mut sizes = vec![0; 3];
        for &a in &result.assignments {
            sizes[a] += 1;
        }
        assert!(sizes.iter().all(|&s| s > 0));
        assert_eq!(sizes.iter().sum::<usize>(), 4);
    }

    #[test]
    fn empty_vectors_are_assigned() {
        let vectors: Vec<SparseVector> = vec![Vec::new(), Vec::new(), vec![(0, 1.0)]];
        let result = fit(&vectors, 1, 2, 3, 10);
        assert_eq!(result.assignments.len(), 3);
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert_ne!(result.assignments[0], result.assignments[2]);
    }
}

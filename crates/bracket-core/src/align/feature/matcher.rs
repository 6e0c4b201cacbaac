//! Brute-force nearest-neighbour descriptor matching.

use rayon::prelude::*;

use super::Descriptors;

/// One query descriptor paired with its nearest train descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

/// Number of differing bits between two 256-bit descriptors.
pub fn hamming_distance(a: &[u8; 32], b: &[u8; 32]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Euclidean distance between two real-valued descriptors.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Match every query descriptor to its nearest train descriptor.
///
/// The result is sorted by ascending distance; equal distances keep query
/// order. Mismatched descriptor kinds produce no matches.
pub fn match_descriptors(query: &Descriptors, train: &Descriptors) -> Vec<FeatureMatch> {
    let mut matches: Vec<FeatureMatch> = match (query, train) {
        (Descriptors::Binary(q), Descriptors::Binary(t)) if !t.is_empty() => q
            .par_iter()
            .enumerate()
            .filter_map(|(query_idx, d)| {
                nearest(t.iter().map(|c| hamming_distance(d, c) as f32)).map(
                    |(train_idx, distance)| FeatureMatch {
                        query_idx,
                        train_idx,
                        distance,
                    },
                )
            })
            .collect(),
        (Descriptors::Float(q), Descriptors::Float(t)) if !t.is_empty() => q
            .par_iter()
            .enumerate()
            .filter_map(|(query_idx, d)| {
                nearest(t.iter().map(|c| l2_distance(d, c))).map(|(train_idx, distance)| {
                    FeatureMatch {
                        query_idx,
                        train_idx,
                        distance,
                    }
                })
            })
            .collect(),
        _ => Vec::new(),
    };

    // Stable: ties stay in query order.
    matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    matches
}

/// Index and value of the smallest distance; the first one wins ties.
fn nearest(distances: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
    distances
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((i, d)),
        })
}

//! Median threshold bitmaps and their disagreement score.
//!
//! A median threshold bitmap (MTB) is invariant to the exposure of the frame
//! it came from, up to the pixels that sit close to the median. Those are
//! flagged by the exclusion bitmap and left out of the comparison.
//!
//! Reference: G. Ward, "Fast, Robust Image Registration for Compositing High
//! Dynamic Range Photographs from Hand-Held Exposures", JGT 8(2), 2003.

use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::frame::PixelOffset;
use crate::pipeline::config::ExclusionMasking;

/// Threshold and exclusion bitmaps for one pyramid level.
#[derive(Clone, Debug)]
pub struct BitmapPair {
    /// `true` where the pixel is at or above the median.
    pub threshold: Array2<bool>,
    /// `true` where the pixel is further than the tolerance from the median.
    pub exclusion: Array2<bool>,
    pub median: f32,
}

impl BitmapPair {
    pub fn dim(&self) -> (usize, usize) {
        self.threshold.dim()
    }
}

/// Median of all pixel values. Even counts average the two middle values.
pub fn median(data: &Array2<f32>) -> f32 {
    let mut values: Vec<f32> = data.iter().copied().collect();
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let odd = values.len() % 2 == 1;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if odd {
        upper
    } else {
        let below = lower.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (below + upper) * 0.5
    }
}

/// Compute the median threshold bitmap and exclusion bitmap of one level.
pub fn compute_bitmaps(level: &Array2<f32>, tolerance: f32) -> BitmapPair {
    let med = median(level);
    BitmapPair {
        threshold: level.mapv(|v| v >= med),
        exclusion: level.mapv(|v| (v - med).abs() > tolerance),
        median: med,
    }
}

/// Count pixels where the candidate bitmap, translated by `offset`, disagrees
/// with the reference bitmap.
///
/// The translated candidate at `(x, y)` reads its source at `(x - dx, y - dy)`;
/// source pixels outside the frame read as `false`.
pub fn disagreement(
    offset: PixelOffset,
    reference: &BitmapPair,
    candidate: &BitmapPair,
    masking: ExclusionMasking,
) -> u64 {
    let (h, w) = reference.dim();
    let count_row = |y: usize| -> u64 {
        let sy = y as i64 - offset.dy as i64;
        let row_in = sy >= 0 && sy < h as i64;
        let mut count = 0u64;
        for x in 0..w {
            let sx = x as i64 - offset.dx as i64;
            let inside = row_in && sx >= 0 && sx < w as i64;
            let (bit, cand_excl) = if inside {
                let (sy, sx) = (sy as usize, sx as usize);
                (
                    candidate.threshold[[sy, sx]],
                    candidate.exclusion[[sy, sx]],
                )
            } else {
                (false, false)
            };

            let gate = match masking {
                ExclusionMasking::CandidateOnly => candidate.exclusion[[y, x]],
                ExclusionMasking::Both => cand_excl && reference.exclusion[[y, x]],
            };

            if gate && (bit ^ reference.threshold[[y, x]]) {
                count += 1;
            }
        }
        count
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h).into_par_iter().map(count_row).sum()
    } else {
        (0..h).map(count_row).sum()
    }
}

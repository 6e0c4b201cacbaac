//! Pyramidal median threshold bitmap (MTB) alignment.
//!
//! Every frame is reduced to a grey proxy, a pyramid is built over it, and
//! the integer translation that minimizes bitmap disagreement with the
//! reference is searched from the coarsest level down. The offset carried
//! from one level is doubled before refining it on the next. The result is
//! applied to the original (color) image as a pure pixel shift.

use ndarray::Array2;
use tracing::debug;

use crate::color::mtb_luma;
use crate::frame::{Image, PixelOffset};
use crate::pipeline::config::MtbConfig;

use super::bitmap::{compute_bitmaps, disagreement, BitmapPair};
use super::pyramid::{build_pyramid_with_levels, pyramid_levels};
use super::warp::translate_image;

/// Result of the hierarchical search for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MtbOffset {
    /// Full-resolution translation to apply to the frame.
    pub offset: PixelOffset,
    /// Disagreement count at the finest level for `offset`.
    pub disagreement: u64,
}

/// Reference bitmaps for every pyramid level, computed once per stack.
#[derive(Clone, Debug)]
pub struct MtbReference {
    levels: usize,
    bitmaps: Vec<BitmapPair>,
}

impl MtbReference {
    pub fn new(reference: &Image, config: &MtbConfig) -> Self {
        let luma = mtb_luma(reference, config.luma);
        let levels = pyramid_levels(reference.width(), reference.height());
        let bitmaps = build_pyramid_with_levels(&luma, levels)
            .iter()
            .map(|level| compute_bitmaps(level, config.exclusion_tolerance))
            .collect();
        Self { levels, bitmaps }
    }

    /// Number of downsampled levels above full resolution.
    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Bitmaps ordered coarsest first.
    pub fn bitmaps(&self) -> &[BitmapPair] {
        &self.bitmaps
    }
}

/// Find the integer translation that best maps `target` onto the reference.
pub fn compute_offset_mtb(
    reference: &MtbReference,
    target: &Image,
    config: &MtbConfig,
) -> MtbOffset {
    let luma = mtb_luma(target, config.luma);
    compute_offset_mtb_luma(reference, &luma, config)
}

/// Same as [`compute_offset_mtb`] on an already computed grey proxy (0..255 scale).
pub fn compute_offset_mtb_luma(
    reference: &MtbReference,
    luma: &Array2<f32>,
    config: &MtbConfig,
) -> MtbOffset {
    let pyramid = build_pyramid_with_levels(luma, reference.levels);
    let deltas = config.search_window.deltas();

    let mut offset = PixelOffset::default();
    let mut residual = 0u64;

    for (level, (ref_bitmaps, image)) in reference.bitmaps.iter().zip(&pyramid).enumerate() {
        if level > 0 {
            offset = offset.doubled();
        }
        let candidate = compute_bitmaps(image, config.exclusion_tolerance);

        let mut best = offset;
        let mut best_score = u64::MAX;
        for &dx in deltas {
            for &dy in deltas {
                let trial = offset + PixelOffset::new(dx, dy);
                let score = disagreement(trial, ref_bitmaps, &candidate, config.masking);
                if score < best_score {
                    best_score = score;
                    best = trial;
                }
            }
        }

        offset = best;
        residual = best_score;
        debug!(level, dx = offset.dx, dy = offset.dy, residual, "MTB level");
    }

    MtbOffset {
        offset,
        disagreement: residual,
    }
}

/// Align one frame: search its offset and shift the original image by it.
pub fn align_mtb(
    reference: &MtbReference,
    target: &Image,
    config: &MtbConfig,
) -> (Image, MtbOffset) {
    let found = compute_offset_mtb(reference, target, config);
    (translate_image(target, found.offset), found)
}

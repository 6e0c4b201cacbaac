use ndarray::Array2;

use crate::error::{BracketError, Result};

/// A single grayscale image plane.
/// Pixel values are f32 in [0.0, 1.0].
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
    /// Original bit depth before conversion (8 or 16)
    pub original_bit_depth: u8,
}

impl Frame {
    pub fn new(data: Array2<f32>, bit_depth: u8) -> Self {
        Self {
            data,
            original_bit_depth: bit_depth,
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// Color image composed of separate channel frames.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorFrame {
    pub red: Frame,
    pub green: Frame,
    pub blue: Frame,
}

/// One exposure: either a single grayscale plane or three color planes (R, G, B).
#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum Image {
    Mono(Frame),
    Color(ColorFrame),
}

impl Image {
    pub fn width(&self) -> usize {
        match self {
            Self::Mono(f) => f.width(),
            Self::Color(cf) => cf.red.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            Self::Mono(f) => f.height(),
            Self::Color(cf) => cf.red.height(),
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::Mono(_) => 1,
            Self::Color(_) => 3,
        }
    }

    pub fn bit_depth(&self) -> u8 {
        match self {
            Self::Mono(f) => f.original_bit_depth,
            Self::Color(cf) => cf.red.original_bit_depth,
        }
    }

    /// Planes in channel order (one for mono, R/G/B for color).
    pub fn planes(&self) -> Vec<&Array2<f32>> {
        match self {
            Self::Mono(f) => vec![&f.data],
            Self::Color(cf) => vec![&cf.red.data, &cf.green.data, &cf.blue.data],
        }
    }

    /// Apply the same per-plane transform to every channel, producing a new image.
    pub fn map_planes<F>(&self, process_fn: F) -> Image
    where
        F: Fn(&Array2<f32>) -> Array2<f32>,
    {
        match self {
            Self::Mono(f) => Self::Mono(Frame::new(process_fn(&f.data), f.original_bit_depth)),
            Self::Color(cf) => Self::Color(ColorFrame {
                red: Frame::new(process_fn(&cf.red.data), cf.red.original_bit_depth),
                green: Frame::new(process_fn(&cf.green.data), cf.green.original_bit_depth),
                blue: Frame::new(process_fn(&cf.blue.data), cf.blue.original_bit_depth),
            }),
        }
    }
}

/// Integer translation in pixels at one pyramid level's resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelOffset {
    pub dx: i32,
    pub dy: i32,
}

impl PixelOffset {
    pub fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }

    /// The same translation expressed at twice the linear resolution.
    pub fn doubled(self) -> Self {
        Self {
            dx: self.dx * 2,
            dy: self.dy * 2,
        }
    }
}

impl std::ops::Add for PixelOffset {
    type Output = PixelOffset;

    fn add(self, rhs: PixelOffset) -> PixelOffset {
        PixelOffset {
            dx: self.dx + rhs.dx,
            dy: self.dy + rhs.dy,
        }
    }
}

/// Images of one scene with their exposure times in seconds, sorted ascending.
#[derive(Clone, Debug)]
pub struct ExposureStack {
    pub images: Vec<Image>,
    pub exposures: Vec<f32>,
}

impl ExposureStack {
    /// Build a stack, sorting by exposure time and checking the stack invariants.
    pub fn new(images: Vec<Image>, exposures: Vec<f32>) -> Result<Self> {
        if images.is_empty() {
            return Err(BracketError::EmptySequence);
        }
        if images.len() != exposures.len() {
            return Err(BracketError::InvalidStack(format!(
                "{} images but {} exposure times",
                images.len(),
                exposures.len()
            )));
        }
        if let Some(bad) = exposures.iter().find(|&&t| !(t > 0.0 && t.is_finite())) {
            return Err(BracketError::InvalidStack(format!(
                "exposure time must be positive, got {bad}"
            )));
        }
        check_dimensions(&images)?;

        let mut paired: Vec<(Image, f32)> = images.into_iter().zip(exposures).collect();
        paired.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (images, exposures) = paired.into_iter().unzip();

        Ok(Self { images, exposures })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Check that every image shares the first image's width and height.
pub fn check_dimensions(images: &[Image]) -> Result<()> {
    let Some(first) = images.first() else {
        return Err(BracketError::EmptySequence);
    };
    let (w, h) = (first.width(), first.height());
    for (index, image) in images.iter().enumerate().skip(1) {
        if image.width() != w || image.height() != h {
            return Err(BracketError::DimensionMismatch {
                index,
                expected_w: w,
                expected_h: h,
                got_w: image.width(),
                got_h: image.height(),
            });
        }
    }
    Ok(())
}

/// Middle index of a stack of `n` images, the default alignment reference.
pub fn default_reference_index(n: usize) -> usize {
    n.saturating_sub(1) / 2
}

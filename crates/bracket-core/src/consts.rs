/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum frame count to use frame-level Rayon parallelism.
pub const PARALLEL_FRAME_THRESHOLD: usize = 4;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// ITU-R BT.601 luminance coefficient for the red channel.
pub const LUMINANCE_R: f32 = 0.299;

/// ITU-R BT.601 luminance coefficient for the green channel.
pub const LUMINANCE_G: f32 = 0.587;

/// ITU-R BT.601 luminance coefficient for the blue channel.
pub const LUMINANCE_B: f32 = 0.114;

/// Integer luma weights for the MTB grey proxy, applied as `(19R + 183G + 54B) / 256`.
pub const MTB_LUMA_WEIGHTS: [f32; 3] = [19.0, 183.0, 54.0];

/// Scale applied to `[0, 1]` frames before bitmap thresholding, so tolerances are in 8-bit units.
pub const MTB_INTENSITY_SCALE: f32 = 255.0;

/// The MTB pyramid stops downsampling once the short side would drop below this.
pub const PYRAMID_MIN_DIMENSION: usize = 64;

/// Default half-width of the ambiguous band around the median (8-bit units).
pub const DEFAULT_EXCLUSION_TOLERANCE: f32 = 10.0;

/// Default minimum number of descriptor matches for feature alignment.
pub const DEFAULT_MIN_MATCHES: usize = 9;

/// Default fraction of the sorted matches kept for homography estimation.
pub const DEFAULT_MATCH_PERCENT: f32 = 0.15;

/// Default number of ORB features retained per image.
pub const DEFAULT_ORB_FEATURES: usize = 500;

/// Default RANSAC reprojection threshold in pixels.
pub const DEFAULT_RANSAC_THRESHOLD: f64 = 3.0;

/// Default RANSAC iteration cap.
pub const DEFAULT_RANSAC_ITERATIONS: usize = 2000;

/// Fixed RNG seed so RANSAC and the BRIEF pattern are reproducible run to run.
pub const DEFAULT_RANSAC_SEED: u64 = 0x5EED_B4AC;

/// Default ECC iteration cap.
pub const DEFAULT_ECC_ITERATIONS: usize = 5000;

/// Default ECC convergence epsilon on the correlation coefficient.
pub const DEFAULT_ECC_EPSILON: f64 = 1e-10;

/// Default Gaussian kernel size used to pre-smooth ECC inputs.
pub const DEFAULT_ECC_GAUSS_SIZE: usize = 5;

/// Default number of pixel samples for Debevec response recovery.
pub const DEFAULT_DEBEVEC_SAMPLES: usize = 70;

/// Default smoothness weight for Debevec response recovery.
pub const DEFAULT_DEBEVEC_LAMBDA: f64 = 10.0;

/// Default iteration cap for Robertson response recovery.
pub const DEFAULT_ROBERTSON_ITERATIONS: usize = 30;

/// Default Robertson stopping threshold on the summed response change.
pub const DEFAULT_ROBERTSON_THRESHOLD: f32 = 0.01;

/// Number of discrete 8-bit intensity levels in a response curve.
pub const RESPONSE_LEVELS: usize = 256;

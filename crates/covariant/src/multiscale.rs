//! Harris-affine detection over a Gaussian scale-space.
//!
//! The pipeline builds a [`ScaleSpacePyramid`], computes the scale-normalized
//! Harris response of every level, picks candidates per level (or over the
//! scale neighborhood of an octave), and runs one [`AffineShapeAdapter`] per
//! candidate on the level it was found on. Converged candidates become
//! [`Keypoint`]s in input-image coordinates; diverged and exhausted ones are
//! dropped and only counted.

use crate::image::gray_to_f32;
use covariant_core::adapt::{AdaptationState, AffineShapeAdapter};
use covariant_core::detect::{detect_candidates, detect_scale_space_candidates, Candidate};
use covariant_core::pyramid::build_gaussian_pyramid;
use covariant_core::response::cornerness_at_scale;
use covariant_core::{
    AdaptParams, BoundaryMode, GaussianBlur, HarrisParams, Keypoint, PyramidParams, ResponseMap,
    Result, ScaleSpacePyramid,
};
use image::GrayImage;
use serde::{Deserialize, Serialize};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::{debug_span, instrument};

/// Parameters of the full detection pipeline.
///
/// - `pyramid`: scale-space discretization.
/// - `harris`: response and candidate selection. On pyramid levels the
///   differentiation scale is the level's scale within its octave and the
///   integration scale keeps the `integration_sigma / differentiation_sigma`
///   ratio.
/// - `adapt`: limits of the affine adaptation loop.
/// - `boundary`: padding used when an adapted patch leaves its level.
/// - `merge_radius`: keypoints closer than this (input pixels) are merged,
///   keeping the stronger one; `0` disables merging.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureParams {
    pub pyramid: PyramidParams,
    pub harris: HarrisParams,
    pub adapt: AdaptParams,
    pub boundary: BoundaryMode,
    pub merge_radius: f32,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            pyramid: PyramidParams::default(),
            harris: HarrisParams::default(),
            adapt: AdaptParams::default(),
            boundary: BoundaryMode::default(),
            // merge duplicates within ~2 pixels
            merge_radius: 2.0,
        }
    }
}

impl FeatureParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pyramid(mut self, pyramid: PyramidParams) -> Self {
        self.pyramid = pyramid;
        self
    }

    pub fn with_harris(mut self, harris: HarrisParams) -> Self {
        self.harris = harris;
        self
    }

    pub fn with_adapt(mut self, adapt: AdaptParams) -> Self {
        self.adapt = adapt;
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryMode) -> Self {
        self.boundary = boundary;
        self
    }

    /// Set the merge radius in input-image pixels.
    pub fn with_merge_radius(mut self, merge_radius: f32) -> Self {
        self.merge_radius = merge_radius;
        self
    }
}

/// How the adaptation runs ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationStats {
    pub candidates: usize,
    pub converged: usize,
    pub diverged: usize,
    pub max_iter_exceeded: usize,
}

impl AdaptationStats {
    fn record(&mut self, state: AdaptationState) {
        self.candidates += 1;
        match state {
            AdaptationState::Converged => self.converged += 1,
            AdaptationState::Diverged => self.diverged += 1,
            AdaptationState::MaxIterExceeded => self.max_iter_exceeded += 1,
            AdaptationState::Seeded | AdaptationState::Iterating => {}
        }
    }
}

pub struct FeatureResult {
    pub keypoints: Vec<Keypoint>,
    pub stats: AdaptationStats,
}

/// A candidate together with the level it was found on.
struct Seed {
    octave: usize,
    candidate: Candidate,
}

/// Detect affine-covariant keypoints in an `image::GrayImage`.
///
/// # Example
/// ```rust
/// use covariant::{find_features_image, FeatureParams};
/// use image::GrayImage;
///
/// let img = GrayImage::from_pixel(64, 64, image::Luma([0u8]));
/// let res = find_features_image(&img, &FeatureParams::default()).unwrap();
/// assert!(res.keypoints.is_empty());
/// assert_eq!(res.stats.candidates, 0);
/// ```
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, params), fields(w = img.width(), h = img.height()))
)]
pub fn find_features_image(img: &GrayImage, params: &FeatureParams) -> Result<FeatureResult> {
    params.harris.validate()?;
    params.adapt.validate()?;
    let blur = GaussianBlur::default();
    let pyramid = build_gaussian_pyramid(&gray_to_f32(img), &params.pyramid, &blur)?;

    #[cfg(feature = "tracing")]
    let detect_span = debug_span!("detect").entered();
    let mut seeds = Vec::new();
    for o in 0..pyramid.num_octaves() {
        let maps = octave_responses(&pyramid, o, &params.harris, &blur);
        if params.harris.scale_neighborhood {
            seeds.extend(
                detect_scale_space_candidates(&maps, &params.harris)
                    .into_iter()
                    .map(|candidate| Seed { octave: o, candidate }),
            );
        } else {
            for (s, map) in maps.iter().enumerate() {
                seeds.extend(detect_candidates(map, &params.harris).into_iter().map(|mut c| {
                    c.scale = s;
                    Seed {
                        octave: o,
                        candidate: c,
                    }
                }));
            }
        }
    }
    #[cfg(feature = "tracing")]
    drop(detect_span);
    log::debug!("{} candidates over {} octaves", seeds.len(), pyramid.num_octaves());

    #[cfg(feature = "tracing")]
    let adapt_span = debug_span!("adapt").entered();

    let ratio = params.harris.integration_ratio() as f64;
    let adapt_one = |seed: &Seed| -> (AdaptationState, Option<Keypoint>) {
        let Candidate { xy, strength, scale } = seed.candidate;
        let o = seed.octave;
        let sigma_i = ratio * pyramid.scale_relative_to_octave(scale);
        let adapter = AffineShapeAdapter::new(
            pyramid.image(scale, o),
            [xy[0] as f64, xy[1] as f64],
            sigma_i,
            params.adapt.clone(),
            params.boundary,
        );
        #[cfg(feature = "tracing")]
        let outcome = adapter
            .with_observer(covariant_core::observer::TracingObserver)
            .run();
        #[cfg(not(feature = "tracing"))]
        let outcome = adapter.run();

        let state = outcome.state();
        let keypoint = outcome.into_shape().and_then(|shape| {
            let center = [xy[0] as f64, xy[1] as f64];
            let sigma = pyramid.scale_relative_to_octave(scale);
            Keypoint::from_affine_shape(center, &shape, sigma, strength)
                .map(|kp| kp.rescaled(pyramid.octave_scaling_factor(o) as f32))
        });
        (state, keypoint)
    };

    #[cfg(feature = "rayon")]
    let adapted: Vec<(AdaptationState, Option<Keypoint>)> =
        seeds.par_iter().map(adapt_one).collect();
    #[cfg(not(feature = "rayon"))]
    let adapted: Vec<(AdaptationState, Option<Keypoint>)> = seeds.iter().map(adapt_one).collect();

    let mut stats = AdaptationStats::default();
    let mut keypoints = Vec::new();
    for (state, keypoint) in adapted {
        stats.record(state);
        keypoints.extend(keypoint);
    }

    #[cfg(feature = "tracing")]
    drop(adapt_span);
    log::debug!(
        "adaptation: {} converged, {} diverged, {} exhausted",
        stats.converged,
        stats.diverged,
        stats.max_iter_exceeded
    );

    #[cfg(feature = "tracing")]
    let merge_span = debug_span!("merge").entered();
    let keypoints = if params.merge_radius > 0.0 {
        merge_keypoints_simple(&mut keypoints, params.merge_radius)
    } else {
        keypoints
    };
    #[cfg(feature = "tracing")]
    drop(merge_span);

    Ok(FeatureResult { keypoints, stats })
}

/// Scale-normalized responses of every scale of octave `o`.
fn octave_responses(
    pyramid: &ScaleSpacePyramid<f32>,
    o: usize,
    harris: &HarrisParams,
    blur: &GaussianBlur,
) -> Vec<ResponseMap> {
    let ratio = harris.integration_ratio();
    let level_response = |s: usize| -> ResponseMap {
        let sigma_d = pyramid.scale_relative_to_octave(s) as f32;
        cornerness_at_scale(pyramid.image(s, o), sigma_d, ratio * sigma_d, harris.kappa, blur)
    };

    #[cfg(feature = "rayon")]
    let maps = (0..pyramid.num_scales_per_octave())
        .into_par_iter()
        .map(level_response)
        .collect();
    #[cfg(not(feature = "rayon"))]
    let maps = (0..pyramid.num_scales_per_octave())
        .map(level_response)
        .collect();
    maps
}

fn merge_keypoints_simple(keypoints: &mut Vec<Keypoint>, radius: f32) -> Vec<Keypoint> {
    let r2 = radius * radius;
    let mut out: Vec<Keypoint> = Vec::new();

    // naive O(N^2); adapted keypoints are few
    'outer: for k in keypoints.drain(..) {
        for o in &mut out {
            let dx = k.center[0] - o.center[0];
            let dy = k.center[1] - o.center[1];
            if dx * dx + dy * dy <= r2 {
                // keep the stronger
                if k.extremum_value > o.extremum_value {
                    *o = k;
                }
                continue 'outer;
            }
        }
        out.push(k);
    }

    out
}

//! Core primitives for affine-covariant local feature detection.
//!
//! # Overview
//!
//! The crate is organised bottom-up:
//!
//! - [`image`] – dense N-dimensional buffers ([`Image`]) with axis 0 fastest.
//! - [`boundary`] – padding policies for reads outside an image (constant,
//!   repeat, periodic).
//! - [`interpolate`] – strict multilinear sampling at real-valued positions.
//! - [`blur`] – the Gaussian blur collaborator used by everything above it.
//! - [`pyramid`] – the octave/scale arena and the Gaussian pyramid builder.
//! - [`tensor`] – gradients and second-moment matrices.
//! - [`response`] – Harris cornerness `det(M) − κ·trace(M)²`.
//! - [`detect`] – thresholding, non-maximum suppression and subpixel
//!   refinement on a response map.
//! - [`adapt`] – the iterative affine shape adaptation state machine, with
//!   hooks in [`observer`].
//! - [`keypoint`] – the output record.
//!
//! No module depends on an image decoding crate; the `covariant` crate wraps
//! this one for `image::GrayImage` inputs.
//!
//! # Features
//!
//! - `rayon` – fills pyramid scales and blurs rows in parallel. Results are
//!   identical with and without it.
//! - `tracing` – instruments the pyramid builder, the detectors and the
//!   adaptation loop with spans and events, and enables
//!   [`observer::TracingObserver`].
//! - `serde` – derives `Serialize`/`Deserialize` on parameter structs and on
//!   [`keypoint::Keypoint`].

pub mod adapt;
pub mod blur;
pub mod boundary;
pub mod detect;
pub mod error;
pub mod image;
pub mod interpolate;
pub mod keypoint;
pub mod observer;
pub mod pyramid;
pub mod response;
pub mod tensor;

pub use crate::adapt::{AdaptParams, AdaptationOutcome, AffineShape, AffineShapeAdapter};
pub use crate::blur::{Blur, GaussianBlur};
pub use crate::boundary::BoundaryMode;
pub use crate::error::{Error, Result};
pub use crate::image::{Image, ImageF32};
pub use crate::keypoint::Keypoint;
pub use crate::pyramid::{PyramidParams, ScaleSpacePyramid};

/// Tunable parameters for the Harris response and candidate detection.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HarrisParams {
    /// Harris sensitivity `κ` in `det − κ·trace²`.
    pub kappa: f32,
    /// Minimum scale-normalized response for a candidate. Negative values are
    /// treated as 0 so edges never qualify.
    pub cornerness_threshold: f32,
    /// Differentiation scale σ_d for single-image detection.
    pub differentiation_sigma: f32,
    /// Integration scale σ_i for single-image detection. On pyramid levels the
    /// ratio `integration_sigma / differentiation_sigma` is kept.
    pub integration_sigma: f32,
    /// Non-maximum suppression radius (in pixels).
    pub nms_radius: u32,
    /// Also require a maximum over the adjacent scales of an octave.
    pub scale_neighborhood: bool,
}

impl Default for HarrisParams {
    fn default() -> Self {
        Self {
            kappa: 0.04,
            cornerness_threshold: 1e-6,
            differentiation_sigma: 1.0,
            integration_sigma: 1.5,
            nms_radius: 1,
            scale_neighborhood: false,
        }
    }
}

impl HarrisParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.differentiation_sigma > 0.0) || !(self.integration_sigma > 0.0) {
            return Err(Error::InvalidParams(format!(
                "differentiation and integration sigmas must be > 0, got {} and {}",
                self.differentiation_sigma, self.integration_sigma
            )));
        }
        if self.nms_radius == 0 {
            return Err(Error::InvalidParams("nms_radius must be >= 1".into()));
        }
        if !self.kappa.is_finite() || !self.cornerness_threshold.is_finite() {
            return Err(Error::InvalidParams(
                "kappa and cornerness_threshold must be finite".into(),
            ));
        }
        Ok(())
    }

    /// `σ_i / σ_d`, the integration scale relative to the differentiation scale.
    pub fn integration_ratio(&self) -> f32 {
        if self.differentiation_sigma > 0.0 {
            self.integration_sigma / self.differentiation_sigma
        } else {
            1.0
        }
    }
}

/// Dense response map in row-major layout.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseMap {
    pub w: usize,
    pub h: usize,
    pub data: Vec<f32>,
}

impl ResponseMap {
    /// Response value at an integer coordinate.
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.w + x]
    }
}

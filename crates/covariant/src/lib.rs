//! Harris-affine feature detection for `image::GrayImage` inputs.
//!
//! This crate wraps [`covariant_core`] with the glue most applications need:
//!
//! - [`image`] – conversion from `GrayImage` and a single-scale Harris map.
//! - [`multiscale`] – the full pipeline: Gaussian pyramid, per-level
//!   cornerness, candidate detection, affine adaptation and merging.
//! - [`app`] – JSON-configured detection runs that write keypoint dumps.
//! - [`logger`] – logging setup for the `app` layer.
//!
//! All of `covariant_core` is re-exported.
//!
//! # Features
//!
//! - `rayon` *(default)* – parallel pyramid fill, per-level responses and
//!   per-keypoint adaptation.
//! - `tracing` *(default)* – spans around every pipeline stage.

pub use covariant_core::*;

pub mod app;
pub mod image;
pub mod logger;
pub mod multiscale;

pub use crate::image::{gray_to_f32, harris_response_image};
pub use crate::multiscale::{
    find_features_image, AdaptationStats, FeatureParams, FeatureResult,
};

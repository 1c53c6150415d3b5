//! Single-scale image helpers.
//!
//! These wrappers expose the core response primitives in terms of
//! `image::GrayImage`, which is convenient for most downstream consumers.

use covariant_core::response::harris_response;
use covariant_core::{GaussianBlur, HarrisParams, ImageF32, ResponseMap};
use image::GrayImage;

/// Convert 8-bit intensities to `[0, 1]` floats.
pub fn gray_to_f32(img: &GrayImage) -> ImageF32 {
    let data: Vec<f32> = img.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
    match ImageF32::from_vec([img.width() as usize, img.height() as usize], data) {
        Ok(out) => out,
        // `GrayImage` guarantees `width * height` samples.
        Err(_) => ImageF32::default(),
    }
}

/// Dense scale-normalized Harris response of an `image::GrayImage`.
#[inline]
pub fn harris_response_image(img: &GrayImage, params: &HarrisParams) -> ResponseMap {
    harris_response(&gray_to_f32(img), params, &GaussianBlur::default())
}

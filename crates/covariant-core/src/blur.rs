//! Gaussian blur collaborator.
//!
//! The pyramid and the structure tensor only need `blur(image, sigma)` to
//! return an image of identical dimensions. [`GaussianBlur`] is the CPU
//! reference; accelerated backends implement [`Blur`] themselves.

use crate::boundary::repeat_index;
use crate::image::ImageF32;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// `blur(image, sigma) -> image` contract. Implementations must return an
/// image with the same dimensions and document their edge behavior.
pub trait Blur: Sync {
    fn blur(&self, image: &ImageF32, sigma: f32) -> ImageF32;
}

/// Separable Gaussian convolution with edge-replicate borders.
#[derive(Clone, Copy, Debug)]
pub struct GaussianBlur {
    /// Kernel half-width in units of sigma.
    pub truncation: f32,
}

impl Default for GaussianBlur {
    fn default() -> Self {
        Self { truncation: 4.0 }
    }
}

impl GaussianBlur {
    /// Normalized 1D kernel of radius `ceil(truncation * sigma)`.
    pub fn kernel(&self, sigma: f32) -> Vec<f32> {
        let radius = ((self.truncation * sigma).ceil() as usize).max(1);
        let s2 = 2.0 * sigma * sigma;
        let mut k: Vec<f32> = (0..=2 * radius)
            .map(|i| {
                let x = i as f32 - radius as f32;
                (-(x * x) / s2).exp()
            })
            .collect();
        let sum: f32 = k.iter().sum();
        for v in &mut k {
            *v /= sum;
        }
        k
    }
}

impl Blur for GaussianBlur {
    /// Edge-replicate: samples outside the image read the nearest edge pixel.
    fn blur(&self, image: &ImageF32, sigma: f32) -> ImageF32 {
        if !(sigma > 0.0) || image.is_empty() {
            return image.clone();
        }
        let kernel = self.kernel(sigma);
        let radius = (kernel.len() / 2) as isize;
        let w = image.width();
        let h = image.height();

        let horizontal = |y: usize, out: &mut [f32]| {
            let src = image.row(y);
            for (x, o) in out.iter_mut().enumerate() {
                let mut acc = 0.0;
                for (k, &kv) in kernel.iter().enumerate() {
                    let xx = repeat_index(x as isize + k as isize - radius, w);
                    acc += kv * src[xx];
                }
                *o = acc;
            }
        };

        let mut tmp = ImageF32::new([w, h], 0.0);
        #[cfg(feature = "rayon")]
        tmp.as_mut_slice()
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| horizontal(y, row));
        #[cfg(not(feature = "rayon"))]
        tmp.as_mut_slice()
            .chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| horizontal(y, row));

        let vertical = |y: usize, out: &mut [f32]| {
            for o in out.iter_mut() {
                *o = 0.0;
            }
            for (k, &kv) in kernel.iter().enumerate() {
                let yy = repeat_index(y as isize + k as isize - radius, h);
                for (o, &v) in out.iter_mut().zip(tmp.row(yy)) {
                    *o += kv * v;
                }
            }
        };

        let mut out = ImageF32::new([w, h], 0.0);
        #[cfg(feature = "rayon")]
        out.as_mut_slice()
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| vertical(y, row));
        #[cfg(not(feature = "rayon"))]
        out.as_mut_slice()
            .chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| vertical(y, row));

        out
    }
}

//! Second-moment (structure tensor) estimation.
//!
//! For a gradient field differentiated at scale σ_d, the structure tensor at
//! integration scale σ_i is
//!
//! ```text
//! M(x, y) = g_σi * (∇I ∇Iᵀ)(x, y)
//! ```
//!
//! Each of the three independent entries of the symmetric 2×2 outer product is
//! diffused separately and the matrix is reassembled per pixel. As a Gaussian
//! average of outer products, `M` is positive semi-definite.

use crate::blur::Blur;
use crate::boundary::{repeat_index, Padding, RepeatPadding};
use crate::image::ImageF32;
use nalgebra::Matrix2;

/// Symmetric 2×2 matrix `[[xx, xy], [xy, yy]]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StructureTensor {
    pub xx: f64,
    pub xy: f64,
    pub yy: f64,
}

impl StructureTensor {
    pub fn new(xx: f64, xy: f64, yy: f64) -> Self {
        Self { xx, xy, yy }
    }

    /// Outer product `g gᵀ` of one gradient sample.
    #[inline]
    pub fn outer(gx: f64, gy: f64) -> Self {
        Self {
            xx: gx * gx,
            xy: gx * gy,
            yy: gy * gy,
        }
    }

    #[inline]
    pub fn det(&self) -> f64 {
        self.xx * self.yy - self.xy * self.xy
    }

    #[inline]
    pub fn trace(&self) -> f64 {
        self.xx + self.yy
    }

    /// Frobenius norm.
    #[inline]
    pub fn norm(&self) -> f64 {
        (self.xx * self.xx + 2.0 * self.xy * self.xy + self.yy * self.yy).sqrt()
    }

    #[inline]
    pub fn scaled(&self, f: f64) -> Self {
        Self {
            xx: self.xx * f,
            xy: self.xy * f,
            yy: self.yy * f,
        }
    }

    pub fn to_matrix(&self) -> Matrix2<f64> {
        Matrix2::new(self.xx, self.xy, self.xy, self.yy)
    }

    /// Symmetrizes the off-diagonal entries.
    pub fn from_matrix(m: &Matrix2<f64>) -> Self {
        Self {
            xx: m[(0, 0)],
            xy: 0.5 * (m[(0, 1)] + m[(1, 0)]),
            yy: m[(1, 1)],
        }
    }
}

impl core::ops::Add for StructureTensor {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            xx: self.xx + rhs.xx,
            xy: self.xy + rhs.xy,
            yy: self.yy + rhs.yy,
        }
    }
}

impl core::ops::AddAssign for StructureTensor {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Horizontal and vertical derivatives of an image.
#[derive(Clone, Debug)]
pub struct Gradient {
    pub dx: ImageF32,
    pub dy: ImageF32,
}

/// Central differences `(I(x+1) − I(x−1)) / 2`, edge-replicated at the border.
pub fn gradient(image: &ImageF32) -> Gradient {
    let w = image.width();
    let h = image.height();
    let mut dx = ImageF32::new([w, h], 0.0);
    let mut dy = ImageF32::new([w, h], 0.0);
    if image.is_empty() {
        return Gradient { dx, dy };
    }

    for y in 0..h {
        let yi = y as isize;
        let row = image.row(y);
        for x in 0..w {
            let xi = x as isize;
            let right = row[repeat_index(xi + 1, w)];
            let left = row[repeat_index(xi - 1, w)];
            *dx.pixel_mut(x, y) = 0.5 * (right - left);

            let down = RepeatPadding.at(image, [xi, yi + 1]);
            let up = RepeatPadding.at(image, [xi, yi - 1]);
            *dy.pixel_mut(x, y) = 0.5 * (down - up);
        }
    }

    Gradient { dx, dy }
}

/// Dense per-pixel structure tensor.
#[derive(Clone, Debug)]
pub struct StructureTensorField {
    pub xx: ImageF32,
    pub xy: ImageF32,
    pub yy: ImageF32,
}

impl StructureTensorField {
    #[inline]
    pub fn width(&self) -> usize {
        self.xx.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.xx.height()
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> StructureTensor {
        StructureTensor {
            xx: *self.xx.pixel(x, y) as f64,
            xy: *self.xy.pixel(x, y) as f64,
            yy: *self.yy.pixel(x, y) as f64,
        }
    }
}

/// Diffuse the gradient outer products with a Gaussian of `sigma_i`.
pub fn structure_tensor_field<B: Blur>(
    grad: &Gradient,
    sigma_i: f32,
    blur: &B,
) -> StructureTensorField {
    let products = |f: fn(f32, f32) -> f32| -> ImageF32 {
        let mut out = grad.dx.clone();
        for (o, &gy) in out.as_mut_slice().iter_mut().zip(grad.dy.as_slice()) {
            *o = f(*o, gy);
        }
        blur.blur(&out, sigma_i)
    };

    StructureTensorField {
        xx: products(|gx, _| gx * gx),
        xy: products(|gx, gy| gx * gy),
        yy: products(|_, gy| gy * gy),
    }
}

/// Gaussian-weighted sum of outer products around `center`, over a window of
/// radius `ceil(3σ)` clipped to the field.
pub fn weighted_structure_tensor(grad: &Gradient, center: [f64; 2], sigma: f64) -> StructureTensor {
    let w = grad.dx.width() as isize;
    let h = grad.dx.height() as isize;
    let r = (3.0 * sigma).ceil().max(1.0) as isize;
    let cx = center[0].round() as isize;
    let cy = center[1].round() as isize;
    let inv = 1.0 / (2.0 * sigma * sigma);

    let mut acc = StructureTensor::default();
    for y in (cy - r).max(0)..(cy + r + 1).min(h) {
        for x in (cx - r).max(0)..(cx + r + 1).min(w) {
            let ddx = x as f64 - center[0];
            let ddy = y as f64 - center[1];
            let weight = (-(ddx * ddx + ddy * ddy) * inv).exp();
            let gx = *grad.dx.pixel(x as usize, y as usize) as f64;
            let gy = *grad.dy.pixel(x as usize, y as usize) as f64;
            acc += StructureTensor::outer(gx, gy).scaled(weight);
        }
    }
    acc
}

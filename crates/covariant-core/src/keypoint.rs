//! Output record of a detected and adapted feature.

use crate::adapt::AffineShape;
use nalgebra::Matrix2;

/// An affine-covariant keypoint in input-image coordinates.
///
/// The shape matrix `S` describes the ellipse `{x : (x − c)ᵀ S (x − c) ≤ 1}`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Keypoint {
    pub center: [f32; 2],
    /// Symmetric 2×2 matrix, row-major.
    pub shape_matrix: [[f32; 2]; 2],
    /// Degrees.
    pub orientation: f32,
    /// Cornerness at the detection peak.
    pub extremum_value: f32,
}

impl Keypoint {
    /// Keypoint for the ellipse `σ·T·(unit disc)` centered at `center`, i.e.
    /// `S = (σ² T Tᵀ)⁻¹`. Returns `None` for a singular transform.
    pub fn from_affine_shape(
        center: [f64; 2],
        shape: &AffineShape,
        sigma: f64,
        extremum_value: f32,
    ) -> Option<Self> {
        let t = shape.transform;
        let s = (t * t.transpose() * (sigma * sigma)).try_inverse()?;
        if !s.iter().all(|v| v.is_finite()) {
            return None;
        }
        let off = 0.5 * (s[(0, 1)] + s[(1, 0)]);
        Some(Self {
            center: [center[0] as f32, center[1] as f32],
            shape_matrix: [[s[(0, 0)] as f32, off as f32], [off as f32, s[(1, 1)] as f32]],
            orientation: shape.orientation_degrees as f32,
            extremum_value,
        })
    }

    /// Circular keypoint of radius `sigma`.
    pub fn isotropic(center: [f32; 2], sigma: f32, extremum_value: f32) -> Self {
        let inv = 1.0 / (sigma * sigma);
        Self {
            center,
            shape_matrix: [[inv, 0.0], [0.0, inv]],
            orientation: 0.0,
            extremum_value,
        }
    }

    /// Semi-axes `[major, minor]` of the shape ellipse.
    pub fn radii(&self) -> [f32; 2] {
        let [[a, b], [_, d]] = self.shape_matrix;
        let m = Matrix2::new(a as f64, b as f64, b as f64, d as f64);
        let ev = m.symmetric_eigenvalues();
        let (lo, hi) = (ev[0].min(ev[1]), ev[0].max(ev[1]));
        [(1.0 / lo.sqrt()) as f32, (1.0 / hi.sqrt()) as f32]
    }

    /// Scale the keypoint from a grid with spacing `factor` to the unit grid.
    pub fn rescaled(&self, factor: f32) -> Self {
        let inv = 1.0 / (factor * factor);
        let [[a, b], [c, d]] = self.shape_matrix;
        Self {
            center: [self.center[0] * factor, self.center[1] * factor],
            shape_matrix: [[a * inv, b * inv], [c * inv, d * inv]],
            orientation: self.orientation,
            extremum_value: self.extremum_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(t: Matrix2<f64>) -> AffineShape {
        AffineShape {
            transform: t,
            orientation_degrees: 30.0,
            iterations: 3,
        }
    }

    #[test]
    fn identity_shape_is_a_circle_of_radius_sigma() {
        let kp = Keypoint::from_affine_shape([5.0, 6.0], &shape(Matrix2::identity()), 2.0, 0.7)
            .unwrap();
        assert_eq!(kp.center, [5.0, 6.0]);
        assert_eq!(kp.shape_matrix, [[0.25, 0.0], [0.0, 0.25]]);
        assert_eq!(kp.orientation, 30.0);
        let [major, minor] = kp.radii();
        assert!((major - 2.0).abs() < 1e-5 && (minor - 2.0).abs() < 1e-5);
    }

    #[test]
    fn anisotropic_shape_radii() {
        let t = Matrix2::new(1.0, 0.0, 0.0, 0.5);
        let kp = Keypoint::from_affine_shape([0.0, 0.0], &shape(t), 4.0, 1.0).unwrap();
        let [[a, b], [c, d]] = kp.shape_matrix;
        assert_eq!(b, c);
        assert!((a - 1.0 / 16.0).abs() < 1e-6 && (d - 1.0 / 4.0).abs() < 1e-6);
        let [major, minor] = kp.radii();
        assert!((major - 4.0).abs() < 1e-4 && (minor - 2.0).abs() < 1e-4);
    }

    #[test]
    fn singular_shape_is_rejected() {
        let t = Matrix2::new(1.0, 2.0, 0.5, 1.0);
        assert!(Keypoint::from_affine_shape([0.0, 0.0], &shape(t), 1.0, 1.0).is_none());
    }

    #[test]
    fn rescaling_moves_center_and_grows_radii() {
        let kp = Keypoint::isotropic([3.0, 4.0], 1.5, 0.1).rescaled(2.0);
        assert_eq!(kp.center, [6.0, 8.0]);
        let [major, minor] = kp.radii();
        assert!((major - 3.0).abs() < 1e-5 && (minor - 3.0).abs() < 1e-5);
    }
}

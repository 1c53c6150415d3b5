use crate::blur::Blur;
use crate::tensor::{gradient, structure_tensor_field, StructureTensorField};
use crate::{HarrisParams, ImageF32, ResponseMap};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// `R = det(M) − κ·trace(M)²` at every pixel of a structure tensor field.
pub fn cornerness(field: &StructureTensorField, kappa: f32) -> ResponseMap {
    let w = field.width();
    let h = field.height();
    let mut data = vec![0.0f32; w * h];
    if w == 0 {
        return ResponseMap { w, h, data };
    }

    let kappa = kappa as f64;
    let score_row = |y: usize, row: &mut [f32]| {
        for (x, r) in row.iter_mut().enumerate() {
            let m = field.at(x, y);
            *r = (m.det() - kappa * m.trace() * m.trace()) as f32;
        }
    };

    #[cfg(feature = "rayon")]
    data.par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| score_row(y, row));
    #[cfg(not(feature = "rayon"))]
    data.chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| score_row(y, row));

    ResponseMap { w, h, data }
}

/// Scale-normalized Harris response of an image that is already blurred at
/// `sigma_d`: gradient, tensor at `sigma_i`, multiplication by `sigma_d²`.
///
/// Used on pyramid levels, where the differentiation blur is the level's own
/// scale.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "debug",
        skip(smoothed, blur),
        fields(w = smoothed.width(), h = smoothed.height())
    )
)]
pub fn cornerness_at_scale<B: Blur>(
    smoothed: &ImageF32,
    sigma_d: f32,
    sigma_i: f32,
    kappa: f32,
    blur: &B,
) -> ResponseMap {
    let mut field = structure_tensor_field(&gradient(smoothed), sigma_i, blur);
    let norm = sigma_d * sigma_d;
    for img in [&mut field.xx, &mut field.xy, &mut field.yy] {
        for v in img.as_mut_slice() {
            *v *= norm;
        }
    }
    cornerness(&field, kappa)
}

/// Harris cornerness of a raw image: blur at `differentiation_sigma`, then
/// [`cornerness_at_scale`] with `integration_sigma`.
pub fn harris_response<B: Blur>(image: &ImageF32, params: &HarrisParams, blur: &B) -> ResponseMap {
    let smoothed = blur.blur(image, params.differentiation_sigma);
    cornerness_at_scale(
        &smoothed,
        params.differentiation_sigma,
        params.integration_sigma,
        params.kappa,
        blur,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blur::GaussianBlur;
    use crate::tensor::StructureTensor;

    #[test]
    fn cornerness_formula() {
        let mut field = StructureTensorField {
            xx: ImageF32::new([2, 1], 0.0),
            xy: ImageF32::new([2, 1], 0.0),
            yy: ImageF32::new([2, 1], 0.0),
        };
        // isotropic at x = 0, rank one at x = 1
        *field.xx.pixel_mut(0, 0) = 2.0;
        *field.yy.pixel_mut(0, 0) = 2.0;
        *field.xx.pixel_mut(1, 0) = 4.0;
        let r = cornerness(&field, 0.05);
        let iso = StructureTensor::new(2.0, 0.0, 2.0);
        assert!((r.at(0, 0) as f64 - (iso.det() - 0.05 * 16.0)).abs() < 1e-6);
        assert!((r.at(1, 0) - (-0.05 * 16.0)).abs() < 1e-6);
    }

    #[test]
    fn corner_beats_flat_and_edge() {
        // Bright block with its corner at (16, 16); flat 0.25 patch on the
        // right whose level equals the mean around the corner.
        let mut img = ImageF32::new([72, 32], 0.0);
        for y in 16..32 {
            for x in 16..24 {
                *img.pixel_mut(x, y) = 1.0;
            }
        }
        for y in 0..32 {
            for x in 40..72 {
                *img.pixel_mut(x, y) = 0.25;
            }
        }
        let params = HarrisParams {
            differentiation_sigma: 1.0,
            integration_sigma: 1.5,
            ..HarrisParams::default()
        };
        let resp = harris_response(&img, &params, &GaussianBlur::default());
        let corner = resp.at(16, 16);
        let flat = resp.at(56, 16);
        let edge = resp.at(16, 26);
        assert!(corner > flat, "corner {corner} flat {flat}");
        assert!(corner > 0.0);
        assert!(flat.abs() < 1e-6);
        assert!(edge < corner);
    }
}

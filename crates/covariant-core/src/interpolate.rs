//! Multilinear sub-pixel sampling.
//!
//! [`interpolate`] is strict: it never substitutes boundary values and
//! rejects any query outside `[0, size)`. Callers that sample near the image
//! edge either pad the source or go through [`interpolate_or_pad`].

use crate::boundary::Padding;
use crate::error::{Error, Result};
use crate::image::{Image, Pixel};

/// Multilinear interpolation of `image` at `pos`.
///
/// Each axis coordinate is split into an integer floor and a fraction; the
/// `2^N` surrounding samples are weighted by the product over axes of
/// `1 - frac` (floor corner) or `frac` (floor + 1 corner) and accumulated
/// channel-wise in `f64`. A query exactly on a grid point gives that sample
/// weight 1 and every other corner weight 0, so the stored value comes back
/// unchanged.
///
/// On the last sample of an axis (`size - 1 <= pos < size`) the upper corner
/// does not exist and the last sample is read again.
pub fn interpolate<T: Pixel, const N: usize>(image: &Image<T, N>, pos: [f64; N]) -> Result<T::Acc> {
    let mut start = [0usize; N];
    let mut frac = [0f64; N];
    for i in 0..N {
        let size = image.size(i);
        // `!(p >= 0.0)` also rejects NaN.
        if !(pos[i] >= 0.0) || pos[i] >= size as f64 {
            return Err(Error::OutOfRange {
                axis: i,
                position: pos[i],
                size,
            });
        }
        let floor = pos[i].floor();
        start[i] = floor as usize;
        frac[i] = pos[i] - floor;
    }

    let mut acc = T::zero();
    let mut corner = [0usize; N];
    for mask in 0..(1usize << N) {
        let mut weight = 1.0;
        for i in 0..N {
            let upper = (mask >> i) & 1 == 1;
            weight *= if upper { frac[i] } else { 1.0 - frac[i] };
            corner[i] = if upper {
                (start[i] + 1).min(image.size(i) - 1)
            } else {
                start[i]
            };
        }
        acc = image.at(corner).accumulate(acc, weight);
    }
    Ok(acc)
}

/// Interpolate when `pos` is inside the image, otherwise fall back to
/// `padding` at the nearest integer position.
pub fn interpolate_or_pad<P: Padding<f32>, const N: usize>(
    image: &Image<f32, N>,
    pos: [f64; N],
    padding: &P,
) -> f32 {
    match interpolate(image, pos) {
        Ok(v) => v as f32,
        Err(_) => {
            let mut ipos = [0isize; N];
            for i in 0..N {
                let p = pos[i].round();
                ipos[i] = if p.is_finite() { p as isize } else { 0 };
            }
            padding.at(image, ipos)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{ConstantPadding, RepeatPadding};

    fn ramp() -> Image<f32, 2> {
        let mut data = Vec::new();
        for y in 0..4 {
            for x in 0..5 {
                data.push((x * 10 + y) as f32 + 0.125);
            }
        }
        Image::from_vec([5, 4], data).unwrap()
    }

    #[test]
    fn grid_points_are_exact() {
        let img = ramp();
        for y in 0..4 {
            for x in 0..5 {
                let v = interpolate(&img, [x as f64, y as f64]).unwrap();
                assert_eq!(v, *img.pixel(x, y) as f64);
            }
        }
        assert_eq!(interpolate(&img, [2.0, 0.0]).unwrap(), *img.pixel(2, 0) as f64);
    }

    #[test]
    fn bilinear_midpoints() {
        let img = Image::from_vec([2, 2], vec![0u8, 10, 20, 30]).unwrap();
        assert!((interpolate(&img, [0.5, 0.0]).unwrap() - 5.0).abs() < 1e-12);
        assert!((interpolate(&img, [0.0, 0.5]).unwrap() - 10.0).abs() < 1e-12);
        assert!((interpolate(&img, [0.5, 0.5]).unwrap() - 15.0).abs() < 1e-12);
        assert!((interpolate(&img, [0.25, 0.75]).unwrap() - 17.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_out_of_range_queries() {
        let img = ramp();
        let err = interpolate(&img, [-0.1, 0.0]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { axis: 0, .. }));
        let err = interpolate(&img, [5.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { axis: 0, size: 5, .. }));
        let err = interpolate(&img, [0.0, 4.0]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { axis: 1, size: 4, .. }));
        assert!(interpolate(&img, [f64::NAN, 0.0]).is_err());
    }

    #[test]
    fn last_cell_reuses_the_edge_sample() {
        let img = Image::from_vec([3, 1], vec![0.0f32, 1.0, 4.0]).unwrap();
        let v = interpolate(&img, [2.5, 0.0]).unwrap();
        assert!((v - 4.0).abs() < 1e-12);
    }

    #[test]
    fn works_in_one_and_three_dimensions() {
        let line = Image::from_vec([3], vec![0.0f64, 2.0, 4.0]).unwrap();
        assert!((interpolate(&line, [1.25]).unwrap() - 2.5).abs() < 1e-12);

        let data: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let cube = Image::from_vec([2, 2, 2], data).unwrap();
        // f(x, y, z) = x + 2y + 4z is reproduced exactly by trilinear weights.
        let v = interpolate(&cube, [0.5, 0.25, 0.75]).unwrap();
        assert!((v - (0.5 + 0.5 + 3.0)).abs() < 1e-9);
    }

    #[test]
    fn color_images_interpolate_per_channel() {
        let img = Image::from_vec([2, 1], vec![[0u8, 100, 200], [100, 100, 0]]).unwrap();
        let v = interpolate(&img, [0.5, 0.0]).unwrap();
        assert_eq!(v, [50.0, 100.0, 100.0]);
    }

    #[test]
    fn padded_fallback_outside_the_support() {
        let img = ramp();
        assert_eq!(interpolate_or_pad(&img, [7.3, 1.0], &RepeatPadding), *img.pixel(4, 1));
        assert_eq!(interpolate_or_pad(&img, [-3.0, 1.0], &ConstantPadding(0.0)), 0.0);
        let inside = interpolate_or_pad(&img, [1.5, 1.0], &RepeatPadding);
        assert!((inside - (15.0 + 1.0 + 0.125)).abs() < 1e-5);
    }
}

//! Gaussian scale-space pyramid.
//!
//! The pyramid discretizes `(x, y, σ) -> (g_σ * I)(x, y)`. It is divided into
//! octaves; every octave holds `num_scales_per_octave` images of identical
//! size whose blur follows the geometric progression `σ_s = k^s · σ0`
//! relative to the octave grid. Octave `o` is downsampled by
//! `octave_scaling_factor(o)` relative to the input image, so
//!
//! ```text
//! scale(s, o) = octave_scaling_factor(o) · k^s · σ0
//! ```
//!
//! is expressed in input-image pixels.

use crate::blur::Blur;
use crate::boundary::RepeatPadding;
use crate::error::{Error, Result};
use crate::image::{Image, ImageF32};
use crate::interpolate::interpolate_or_pad;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::{debug, instrument};

/// Parameters used to discretize the Gaussian scale-space.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PyramidParams {
    /// Octave of the first stored image; `-1` upsamples the input 2× first,
    /// positive values skip the finest octaves.
    pub first_octave_index: i32,
    /// Images per octave.
    pub num_scales_per_octave: usize,
    /// Ratio `k` between consecutive scales, conventionally `2^(1/S)` for the
    /// number `S` of scales that doubles σ.
    pub scale_geometric_factor: f64,
    /// Border kept around the smallest octave; bounds the number of octaves.
    pub image_padding_size: usize,
    /// Blur assumed to be already present in the input image, in pixels.
    pub scale_camera: f64,
    /// σ0 of the first image of every octave, in octave pixels.
    pub scale_initial: f64,
    /// Upper bound on the number of octaves; `None` keeps every octave the
    /// image size allows.
    pub num_octaves: Option<usize>,
}

impl Default for PyramidParams {
    fn default() -> Self {
        Self {
            first_octave_index: -1,
            num_scales_per_octave: 3 + 3,
            scale_geometric_factor: 2f64.powf(1.0 / 3.0),
            image_padding_size: 1,
            scale_camera: 0.5,
            scale_initial: 1.6,
            num_octaves: None,
        }
    }
}

impl PyramidParams {
    /// Reject configurations that cannot describe a scale-space.
    pub fn validate(&self) -> Result<()> {
        if self.num_scales_per_octave == 0 {
            return Err(Error::InvalidParams(
                "num_scales_per_octave must be >= 1".into(),
            ));
        }
        if !(self.scale_geometric_factor > 1.0) || !self.scale_geometric_factor.is_finite() {
            return Err(Error::InvalidParams(format!(
                "scale_geometric_factor must be > 1, got {}",
                self.scale_geometric_factor
            )));
        }
        if !(self.scale_initial > 0.0) || !self.scale_initial.is_finite() {
            return Err(Error::InvalidParams(format!(
                "scale_initial must be > 0, got {}",
                self.scale_initial
            )));
        }
        if !(self.scale_camera >= 0.0) || !self.scale_camera.is_finite() {
            return Err(Error::InvalidParams(format!(
                "scale_camera must be >= 0, got {}",
                self.scale_camera
            )));
        }
        if self.num_octaves == Some(0) {
            return Err(Error::InvalidParams("num_octaves must be >= 1".into()));
        }
        if self.first_octave_index.unsigned_abs() > 8 {
            return Err(Error::InvalidParams(format!(
                "first_octave_index {} is out of the supported range [-8, 8]",
                self.first_octave_index
            )));
        }
        Ok(())
    }

    /// Scale index whose relative scale is closest to `2 σ0`, i.e. the level
    /// the next octave is decimated from.
    pub fn doubling_scale_index(&self) -> usize {
        (2f64.ln() / self.scale_geometric_factor.ln()).round().max(1.0) as usize
    }

    /// Spatial scaling factor of octave `o` relative to the input image.
    pub fn octave_scaling_factor(&self, o: usize) -> f64 {
        2f64.powi(self.first_octave_index + o as i32)
    }
}

/// Position of one image in the pyramid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LevelIndex {
    pub octave: usize,
    pub scale: usize,
}

impl LevelIndex {
    pub fn new(octave: usize, scale: usize) -> Self {
        Self { octave, scale }
    }
}

/// Regular image pyramid: the same number of scales and the same geometric
/// factor in every octave.
///
/// The pyramid owns all images in a single arena keyed by
/// [`LevelIndex`]; accessors only hand out borrows.
#[derive(Clone, Debug)]
pub struct ScaleSpacePyramid<T = f32> {
    scale_initial: f64,
    scale_geometric_factor: f64,
    num_scales_per_octave: usize,
    images: Vec<Image<T, 2>>,
    octave_scaling_factors: Vec<f64>,
}

impl<T> Default for ScaleSpacePyramid<T> {
    fn default() -> Self {
        Self {
            scale_initial: 1.6,
            scale_geometric_factor: 2f64.powf(1.0 / 3.0),
            num_scales_per_octave: 0,
            images: Vec::new(),
            octave_scaling_factors: Vec::new(),
        }
    }
}

impl<T> ScaleSpacePyramid<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the pyramid and allocate `num_octaves × num_scales_per_octave`
    /// empty images. Octave scaling factors are reset to 1.
    ///
    /// # Panics
    ///
    /// Panics if either count is zero: that is a configuration bug, not bad
    /// input data.
    pub fn reset(
        &mut self,
        num_octaves: usize,
        num_scales_per_octave: usize,
        scale_initial: f64,
        scale_geometric_factor: f64,
    ) {
        assert!(num_octaves > 0, "a pyramid needs at least one octave");
        assert!(
            num_scales_per_octave > 0,
            "a pyramid needs at least one scale per octave"
        );

        self.images.clear();
        self.images
            .resize_with(num_octaves * num_scales_per_octave, Image::default);
        self.octave_scaling_factors.clear();
        self.octave_scaling_factors.resize(num_octaves, 1.0);

        self.num_scales_per_octave = num_scales_per_octave;
        self.scale_initial = scale_initial;
        self.scale_geometric_factor = scale_geometric_factor;
    }

    #[inline]
    pub fn num_octaves(&self) -> usize {
        self.octave_scaling_factors.len()
    }

    #[inline]
    pub fn num_scales_per_octave(&self) -> usize {
        self.num_scales_per_octave
    }

    #[inline]
    pub fn scale_initial(&self) -> f64 {
        self.scale_initial
    }

    #[inline]
    pub fn scale_geometric_factor(&self) -> f64 {
        self.scale_geometric_factor
    }

    #[inline]
    pub fn octave_scaling_factor(&self, o: usize) -> f64 {
        self.octave_scaling_factors[o]
    }

    /// Set the downsampling factor of octave `o`. Factors are independent so
    /// callers can use a fixed-ratio cascade or any measured set of ratios.
    #[inline]
    pub fn set_octave_scaling_factor(&mut self, o: usize, factor: f64) {
        self.octave_scaling_factors[o] = factor;
    }

    /// `k^s · σ0`, the blur of scale `s` in octave pixels.
    #[inline]
    pub fn scale_relative_to_octave(&self, s: usize) -> f64 {
        self.scale_geometric_factor.powi(s as i32) * self.scale_initial
    }

    /// Blur of scale `s` in octave `o`, in input-image pixels.
    #[inline]
    pub fn scale(&self, s: usize, o: usize) -> f64 {
        self.octave_scaling_factors[o] * self.scale_relative_to_octave(s)
    }

    #[inline]
    fn slot(&self, s: usize, o: usize) -> usize {
        assert!(
            s < self.num_scales_per_octave,
            "scale {s} out of range (num_scales_per_octave = {})",
            self.num_scales_per_octave
        );
        o * self.num_scales_per_octave + s
    }

    /// All images of octave `o`, ordered by scale.
    pub fn octave(&self, o: usize) -> &[Image<T, 2>] {
        let n = self.num_scales_per_octave;
        &self.images[o * n..(o + 1) * n]
    }

    pub fn octave_mut(&mut self, o: usize) -> &mut [Image<T, 2>] {
        let n = self.num_scales_per_octave;
        &mut self.images[o * n..(o + 1) * n]
    }

    pub fn image(&self, s: usize, o: usize) -> &Image<T, 2> {
        &self.images[self.slot(s, o)]
    }

    pub fn image_mut(&mut self, s: usize, o: usize) -> &mut Image<T, 2> {
        let slot = self.slot(s, o);
        &mut self.images[slot]
    }

    pub fn pixel(&self, x: usize, y: usize, s: usize, o: usize) -> &T {
        self.image(s, o).pixel(x, y)
    }

    pub fn pixel_mut(&mut self, x: usize, y: usize, s: usize, o: usize) -> &mut T {
        self.image_mut(s, o).pixel_mut(x, y)
    }

    pub fn level(&self, idx: LevelIndex) -> &Image<T, 2> {
        self.image(idx.scale, idx.octave)
    }

    /// Iterate over every image in octave-major, scale-minor order.
    pub fn levels(&self) -> impl Iterator<Item = (LevelIndex, &Image<T, 2>)> + '_ {
        let n = self.num_scales_per_octave.max(1);
        self.images
            .iter()
            .enumerate()
            .map(move |(i, img)| (LevelIndex::new(i / n, i % n), img))
    }

    /// Common `(width, height)` of octave `o`, or `None` if it is empty or
    /// its images disagree.
    pub fn octave_dimensions(&self, o: usize) -> Option<(usize, usize)> {
        let octave = self.octave(o);
        let first = octave.first()?;
        let dims = (first.width(), first.height());
        if first.is_empty() || octave.iter().any(|im| (im.width(), im.height()) != dims) {
            return None;
        }
        Some(dims)
    }
}

/// Number of octaves a `width × height` input yields: octaves are added while
/// their smallest side stays larger than twice the padding size, up to
/// `params.num_octaves`.
pub fn num_octaves_for(width: usize, height: usize, params: &PyramidParams) -> usize {
    let mut side = width.min(height);
    if params.first_octave_index < 0 {
        side <<= params.first_octave_index.unsigned_abs();
    } else {
        side >>= params.first_octave_index as u32;
    }
    let floor = 2 * params.image_padding_size.max(1);
    let mut count = 0;
    while side > floor {
        count += 1;
        side /= 2;
    }
    params.num_octaves.map_or(count, |cap| count.min(cap))
}

/// Fill a Gaussian pyramid from a float image.
///
/// The input is resampled to the first octave's grid, brought from
/// `scale_camera` to `scale_initial`, and every scale of an octave is then
/// blurred directly from the octave base with `sqrt(σ_s² − σ0²)`, so the
/// scales of one octave are independent of each other. The next octave's base
/// is the 2× decimation of the level at `2σ0`, which makes octaves
/// sequential.
///
/// Returns an empty pyramid when the image is too small for one octave.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "debug",
        skip(base, params, blur),
        fields(w = base.width(), h = base.height())
    )
)]
pub fn build_gaussian_pyramid<B: Blur>(
    base: &ImageF32,
    params: &PyramidParams,
    blur: &B,
) -> Result<ScaleSpacePyramid<f32>> {
    params.validate()?;

    let num_octaves = num_octaves_for(base.width(), base.height(), params);
    let mut pyramid = ScaleSpacePyramid::new();
    if num_octaves == 0 {
        return Ok(pyramid);
    }

    let sigma0 = params.scale_initial;
    let k = params.scale_geometric_factor;
    let num_scales = params.num_scales_per_octave;
    pyramid.reset(num_octaves, num_scales, sigma0, k);

    // Resample to the first octave; the camera blur scales with the grid.
    let mut octave_base = base.clone();
    let mut camera = params.scale_camera;
    if params.first_octave_index < 0 {
        for _ in 0..params.first_octave_index.unsigned_abs() {
            octave_base = upsample_2x(&octave_base);
            camera *= 2.0;
        }
    } else {
        for _ in 0..params.first_octave_index {
            octave_base = decimate_2x(&octave_base);
            camera *= 0.5;
        }
    }
    if camera < sigma0 {
        let sigma = (sigma0 * sigma0 - camera * camera).sqrt();
        octave_base = blur.blur(&octave_base, sigma as f32);
    }

    let doubling = params.doubling_scale_index();
    let incremental: Vec<f32> = (0..num_scales)
        .map(|s| {
            let sigma_s = k.powi(s as i32) * sigma0;
            (sigma_s * sigma_s - sigma0 * sigma0).max(0.0).sqrt() as f32
        })
        .collect();

    for o in 0..num_octaves {
        pyramid.set_octave_scaling_factor(o, params.octave_scaling_factor(o));

        let fill = |s: usize| -> ImageF32 {
            if s == 0 {
                octave_base.clone()
            } else {
                blur.blur(&octave_base, incremental[s])
            }
        };

        #[cfg(feature = "rayon")]
        let levels: Vec<ImageF32> = (0..num_scales).into_par_iter().map(fill).collect();
        #[cfg(not(feature = "rayon"))]
        let levels: Vec<ImageF32> = (0..num_scales).map(fill).collect();

        #[cfg(feature = "tracing")]
        debug!(
            octave = o,
            w = octave_base.width(),
            h = octave_base.height(),
            factor = pyramid.octave_scaling_factor(o),
            "filled octave"
        );

        if o + 1 < num_octaves {
            octave_base = if doubling < num_scales {
                decimate_2x(&levels[doubling])
            } else {
                let sigma = (3.0f64).sqrt() * sigma0;
                decimate_2x(&blur.blur(&octave_base, sigma as f32))
            };
        }

        for (slot, img) in pyramid.octave_mut(o).iter_mut().zip(levels) {
            *slot = img;
        }
    }

    Ok(pyramid)
}

/// Bilinear 2× enlargement; output sample `(x, y)` reads the input at
/// `(x / 2, y / 2)`.
pub fn upsample_2x(src: &ImageF32) -> ImageF32 {
    let w = src.width() * 2;
    let h = src.height() * 2;
    let mut dst = ImageF32::new([w, h], 0.0);
    for y in 0..h {
        for x in 0..w {
            *dst.pixel_mut(x, y) =
                interpolate_or_pad(src, [x as f64 * 0.5, y as f64 * 0.5], &RepeatPadding);
        }
    }
    dst
}

/// Keep every other sample in both directions.
pub fn decimate_2x(src: &ImageF32) -> ImageF32 {
    let w = src.width().div_ceil(2);
    let h = src.height().div_ceil(2);
    let mut dst = ImageF32::new([w, h], 0.0);
    for y in 0..h {
        let row = src.row(2 * y);
        for (x, d) in dst.row_mut(y).iter_mut().enumerate() {
            *d = row[2 * x];
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blur::GaussianBlur;

    fn third_octave_pyramid() -> ScaleSpacePyramid<f32> {
        let mut p = ScaleSpacePyramid::new();
        p.reset(4, 3, 1.6, 2f64.powf(1.0 / 3.0));
        for o in 0..4 {
            p.set_octave_scaling_factor(o, 2f64.powi(o as i32 - 1));
        }
        p
    }

    #[test]
    fn scales_increase_within_an_octave() {
        let p = third_octave_pyramid();
        for o in 0..p.num_octaves() {
            for s in 1..p.num_scales_per_octave() {
                assert!(p.scale(s - 1, o) < p.scale(s, o));
            }
        }
    }

    #[test]
    fn three_scales_double_sigma() {
        let p = third_octave_pyramid();
        for o in 0..p.num_octaves() {
            let ratio = p.scale(3, o) / p.scale(0, o);
            assert!((ratio - 2.0).abs() < 1e-12, "octave {o}: ratio {ratio}");
        }
        assert!((p.scale_relative_to_octave(0) - 1.6).abs() < 1e-12);
        assert!((p.scale(0, 0) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn reset_clears_previous_content() {
        let mut p = third_octave_pyramid();
        *p.image_mut(2, 1) = ImageF32::new([3, 3], 1.0);
        p.reset(2, 5, 1.0, 1.5);
        assert_eq!(p.num_octaves(), 2);
        assert_eq!(p.num_scales_per_octave(), 5);
        assert!(p.levels().all(|(_, img)| img.is_empty()));
        assert_eq!(p.octave_scaling_factor(1), 1.0);
    }

    #[test]
    #[should_panic(expected = "at least one octave")]
    fn reset_rejects_zero_octaves() {
        ScaleSpacePyramid::<f32>::new().reset(0, 3, 1.6, 1.26);
    }

    #[test]
    #[should_panic(expected = "at least one scale")]
    fn reset_rejects_zero_scales() {
        ScaleSpacePyramid::<f32>::new().reset(2, 0, 1.6, 1.26);
    }

    #[test]
    fn accessors_address_the_same_storage() {
        let mut p = third_octave_pyramid();
        *p.image_mut(1, 2) = ImageF32::new([4, 2], 0.0);
        *p.pixel_mut(3, 1, 1, 2) = 7.0;
        assert_eq!(*p.pixel(3, 1, 1, 2), 7.0);
        assert_eq!(*p.octave(2)[1].pixel(3, 1), 7.0);
        assert_eq!(*p.level(LevelIndex::new(2, 1)).pixel(3, 1), 7.0);
        let idx: Vec<_> = p.levels().map(|(i, _)| i).take(4).collect();
        assert_eq!(
            idx,
            vec![
                LevelIndex::new(0, 0),
                LevelIndex::new(0, 1),
                LevelIndex::new(0, 2),
                LevelIndex::new(1, 0)
            ]
        );
    }

    #[test]
    fn octave_count_follows_padding() {
        let params = PyramidParams::default();
        // 32 -> 64 after upsampling; 64, 32, 16, 8, 4 are larger than 2.
        assert_eq!(num_octaves_for(32, 40, &params), 5);
        let params = PyramidParams {
            first_octave_index: 0,
            image_padding_size: 4,
            ..PyramidParams::default()
        };
        // 32, 16 are larger than 8.
        assert_eq!(num_octaves_for(32, 32, &params), 2);
        assert_eq!(num_octaves_for(8, 100, &params), 0);
        let capped = PyramidParams {
            num_octaves: Some(3),
            ..PyramidParams::default()
        };
        assert_eq!(num_octaves_for(32, 40, &capped), 3);
        assert!(PyramidParams {
            num_octaves: Some(0),
            ..PyramidParams::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn doubling_index_matches_geometric_factor() {
        assert_eq!(PyramidParams::default().doubling_scale_index(), 3);
        let p = PyramidParams {
            scale_geometric_factor: 2f64.sqrt(),
            ..PyramidParams::default()
        };
        assert_eq!(p.doubling_scale_index(), 2);
    }

    #[test]
    fn validate_rejects_bad_factors() {
        let p = PyramidParams {
            scale_geometric_factor: 1.0,
            ..PyramidParams::default()
        };
        assert!(p.validate().is_err());
        let p = PyramidParams {
            num_scales_per_octave: 0,
            ..PyramidParams::default()
        };
        assert!(p.validate().is_err());
        assert!(PyramidParams::default().validate().is_ok());
    }

    #[test]
    fn gaussian_pyramid_has_consistent_octaves() {
        let mut img = ImageF32::new([24, 20], 0.0);
        for y in 8..14 {
            for x in 6..16 {
                *img.pixel_mut(x, y) = 1.0;
            }
        }
        let params = PyramidParams::default();
        let pyr = build_gaussian_pyramid(&img, &params, &GaussianBlur::default()).unwrap();
        assert_eq!(pyr.num_octaves(), num_octaves_for(24, 20, &params));
        assert_eq!(pyr.octave_dimensions(0), Some((48, 40)));
        assert_eq!(pyr.octave_dimensions(1), Some((24, 20)));
        assert_eq!(pyr.octave_dimensions(2), Some((12, 10)));
        assert!((pyr.octave_scaling_factor(0) - 0.5).abs() < 1e-12);
        assert!((pyr.octave_scaling_factor(2) - 2.0).abs() < 1e-12);

        // More blur means a lower peak.
        let peaks: Vec<f32> = pyr
            .octave(0)
            .iter()
            .map(|im| im.as_slice().iter().cloned().fold(f32::MIN, f32::max))
            .collect();
        for w in peaks.windows(2) {
            assert!(w[1] <= w[0] + 1e-6);
        }
    }

    #[test]
    fn tiny_images_yield_an_empty_pyramid() {
        let img = ImageF32::new([1, 1], 0.5);
        let params = PyramidParams {
            first_octave_index: 0,
            ..PyramidParams::default()
        };
        let pyr = build_gaussian_pyramid(&img, &params, &GaussianBlur::default()).unwrap();
        assert_eq!(pyr.num_octaves(), 0);
    }

    #[test]
    fn resampling_helpers() {
        let img = Image::from_vec([2, 2], vec![0.0f32, 2.0, 4.0, 6.0]).unwrap();
        let up = upsample_2x(&img);
        assert_eq!(up.sizes(), [4, 4]);
        assert_eq!(*up.pixel(0, 0), 0.0);
        assert_eq!(*up.pixel(1, 0), 1.0);
        assert_eq!(*up.pixel(2, 2), 6.0);
        let down = decimate_2x(&up);
        assert_eq!(down, img);
    }
}

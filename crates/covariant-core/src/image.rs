//! Dense N-dimensional image buffers.
//!
//! Storage is a single `Vec<T>` with axis 0 varying fastest, so a 2D image is
//! row-major with `x` as the inner index, the same layout the response maps
//! use.

use crate::error::{Error, Result};

/// Owned dense image with `N` axes.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T, const N: usize = 2> {
    sizes: [usize; N],
    data: Vec<T>,
}

/// Single-channel float image, the working type of the whole pipeline.
pub type ImageF32 = Image<f32, 2>;

impl<T, const N: usize> Default for Image<T, N> {
    fn default() -> Self {
        Self {
            sizes: [0; N],
            data: Vec::new(),
        }
    }
}

impl<T: Clone, const N: usize> Image<T, N> {
    /// Allocate an image filled with `value`.
    pub fn new(sizes: [usize; N], value: T) -> Self {
        let len = sizes.iter().product();
        Self {
            sizes,
            data: vec![value; len],
        }
    }
}

impl<T, const N: usize> Image<T, N> {
    /// Wrap an existing buffer. Fails if its length is not the product of `sizes`.
    pub fn from_vec(sizes: [usize; N], data: Vec<T>) -> Result<Self> {
        let expected: usize = sizes.iter().product();
        if data.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { sizes, data })
    }

    #[inline]
    pub fn sizes(&self) -> [usize; N] {
        self.sizes
    }

    #[inline]
    pub fn size(&self, axis: usize) -> usize {
        self.sizes[axis]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Linear offset of an in-range position.
    #[inline]
    pub fn offset(&self, pos: [usize; N]) -> usize {
        let mut offset = 0;
        let mut stride = 1;
        for (i, &p) in pos.iter().enumerate() {
            debug_assert!(p < self.sizes[i], "index {p} out of bounds on axis {i}");
            offset += p * stride;
            stride *= self.sizes[i];
        }
        offset
    }

    /// Whether a signed position lies inside the image support.
    #[inline]
    pub fn contains(&self, pos: [isize; N]) -> bool {
        pos.iter()
            .zip(self.sizes.iter())
            .all(|(&p, &s)| p >= 0 && (p as usize) < s)
    }

    #[inline]
    pub fn at(&self, pos: [usize; N]) -> &T {
        &self.data[self.offset(pos)]
    }

    #[inline]
    pub fn at_mut(&mut self, pos: [usize; N]) -> &mut T {
        let offset = self.offset(pos);
        &mut self.data[offset]
    }

    /// Checked access with signed coordinates.
    pub fn get(&self, pos: [isize; N]) -> Option<&T> {
        if !self.contains(pos) {
            return None;
        }
        Some(self.at(pos.map(|p| p as usize)))
    }
}

impl<T> Image<T, 2> {
    #[inline]
    pub fn width(&self) -> usize {
        self.sizes[0]
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.sizes[1]
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &T {
        &self.data[y * self.sizes[0] + x]
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut T {
        let w = self.sizes[0];
        &mut self.data[y * w + x]
    }

    /// One row as a slice.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        let w = self.sizes[0];
        &self.data[y * w..(y + 1) * w]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        let w = self.sizes[0];
        &mut self.data[y * w..(y + 1) * w]
    }
}

/// Pixel types that can be accumulated in an `f64` working type.
///
/// Interpolation and resampling weight stored samples channel-wise without
/// caring whether the image holds bytes, floats or small color arrays.
pub trait Pixel: Copy {
    /// Accumulator, one `f64` per channel.
    type Acc: Copy + PartialEq + core::fmt::Debug;

    fn zero() -> Self::Acc;

    /// `acc + weight * self`, channel-wise.
    fn accumulate(self, acc: Self::Acc, weight: f64) -> Self::Acc;
}

macro_rules! scalar_pixel {
    ($($t:ty),*) => {
        $(
            impl Pixel for $t {
                type Acc = f64;

                #[inline]
                fn zero() -> f64 {
                    0.0
                }

                #[inline]
                fn accumulate(self, acc: f64, weight: f64) -> f64 {
                    acc + weight * f64::from(self)
                }
            }

            impl<const C: usize> Pixel for [$t; C] {
                type Acc = [f64; C];

                #[inline]
                fn zero() -> [f64; C] {
                    [0.0; C]
                }

                #[inline]
                fn accumulate(self, mut acc: [f64; C], weight: f64) -> [f64; C] {
                    for (a, &v) in acc.iter_mut().zip(self.iter()) {
                        *a += weight * f64::from(v);
                    }
                    acc
                }
            }
        )*
    };
}

scalar_pixel!(u8, u16, i16, i32, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_x_fastest() {
        let img = Image::from_vec([3, 2], vec![0, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(*img.at([2, 0]), 2);
        assert_eq!(*img.at([0, 1]), 3);
        assert_eq!(*img.pixel(1, 1), 4);
        assert_eq!(img.row(1), &[3, 4, 5]);
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        let err = Image::<u8, 2>::from_vec([4, 4], vec![0; 15]).unwrap_err();
        assert_eq!(
            err,
            Error::DimensionMismatch {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn three_dimensional_offsets() {
        let mut vol = Image::<u16, 3>::new([2, 3, 4], 0);
        *vol.at_mut([1, 2, 3]) = 7;
        assert_eq!(vol.as_slice()[1 + 2 * 2 + 3 * 6], 7);
        assert_eq!(vol.get([1, 2, 3]), Some(&7));
        assert_eq!(vol.get([2, 0, 0]), None);
        assert_eq!(vol.get([0, -1, 0]), None);
    }

    #[test]
    fn color_pixels_accumulate_per_channel() {
        let acc = [10u8, 20, 30].accumulate(<[u8; 3]>::zero(), 0.5);
        assert_eq!(acc, [5.0, 10.0, 15.0]);
    }
}

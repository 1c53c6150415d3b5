//! Boundary policies: what to read when a sample is requested outside an
//! image's support.
//!
//! Every policy is total: any integer position, however far outside the
//! image, maps to a defined value. Rules are applied per axis, so the same
//! code serves 1D signals, 2D images and 3D volumes.
//!
//! | policy              | `[1,2,3,4,5]` at -1 | at 5 | at 7 |
//! |---------------------|---------------------|------|------|
//! | [`ConstantPadding`] | sentinel            | sentinel | sentinel |
//! | [`RepeatPadding`]   | 1                   | 5    | 5    |
//! | [`PeriodicPadding`] | 1                   | 5    | 3    |

use crate::image::Image;

/// Capability shared by the boundary policies.
pub trait Padding<T: Copy> {
    /// Sample `image` at an integer position that may lie outside its support.
    fn at<const N: usize>(&self, image: &Image<T, N>, pos: [isize; N]) -> T;
}

/// Returns a fixed sentinel outside `[0, size)` on any axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantPadding<T>(pub T);

impl<T: Copy> Padding<T> for ConstantPadding<T> {
    #[inline]
    fn at<const N: usize>(&self, image: &Image<T, N>, pos: [isize; N]) -> T {
        match image.get(pos) {
            Some(&v) => v,
            None => self.0,
        }
    }
}

/// Clamp-to-edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepeatPadding;

impl<T: Copy> Padding<T> for RepeatPadding {
    #[inline]
    fn at<const N: usize>(&self, image: &Image<T, N>, pos: [isize; N]) -> T {
        let mut idx = [0usize; N];
        for i in 0..N {
            idx[i] = repeat_index(pos[i], image.size(i));
        }
        *image.at(idx)
    }
}

/// Mirrored tiling with the edge sample repeated (`... 2 1 | 1 2 3 4 5 | 5 4 ...`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeriodicPadding;

impl<T: Copy> Padding<T> for PeriodicPadding {
    #[inline]
    fn at<const N: usize>(&self, image: &Image<T, N>, pos: [isize; N]) -> T {
        let mut idx = [0usize; N];
        for i in 0..N {
            idx[i] = periodic_index(pos[i], image.size(i));
        }
        *image.at(idx)
    }
}

/// Clamp one coordinate into `[0, len - 1]`. `len` must be non-zero.
#[inline]
pub fn repeat_index(x: isize, len: usize) -> usize {
    debug_assert!(len > 0, "cannot pad an empty axis");
    x.clamp(0, len as isize - 1) as usize
}

/// Fold one coordinate into `[0, len)` by mirroring. `len` must be non-zero.
///
/// Pass 1 reduces `x` into `(-2L, 2L)`; pass 2 reflects into `[0, L)`. The
/// branch boundaries are kept exactly: `y >= L` maps to `2L - y - 1`,
/// `-L <= y < 0` maps to `-y - 1`, and `y < -L` is shifted by `2L`.
#[inline]
pub fn periodic_index(x: isize, len: usize) -> usize {
    debug_assert!(len > 0, "cannot pad an empty axis");
    let li = len as isize;
    let period = 2 * li;

    // `%` truncates toward zero, so `y` keeps the sign of `x`
    let y = x % period;

    let y = if (0..li).contains(&y) {
        y
    } else if y >= li {
        period - y - 1
    } else if y >= -li {
        -y - 1
    } else {
        y + period
    };

    debug_assert!((0..li).contains(&y));
    y as usize
}

/// Runtime-selectable boundary policy, as read from configuration files.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BoundaryMode {
    Constant(f32),
    Repeat,
    Periodic,
}

impl Default for BoundaryMode {
    fn default() -> Self {
        BoundaryMode::Repeat
    }
}

impl Padding<f32> for BoundaryMode {
    #[inline]
    fn at<const N: usize>(&self, image: &Image<f32, N>, pos: [isize; N]) -> f32 {
        match *self {
            BoundaryMode::Constant(v) => ConstantPadding(v).at(image, pos),
            BoundaryMode::Repeat => RepeatPadding.at(image, pos),
            BoundaryMode::Periodic => PeriodicPadding.at(image, pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Image<i32, 2> {
        Image::from_vec([5, 1], vec![1, 2, 3, 4, 5]).unwrap()
    }

    #[test]
    fn constant_returns_sentinel_outside_only() {
        let img = row();
        let pad = ConstantPadding(-9);
        assert_eq!(pad.at(&img, [2, 0]), 3);
        assert_eq!(pad.at(&img, [-1, 0]), -9);
        assert_eq!(pad.at(&img, [5, 0]), -9);
        assert_eq!(pad.at(&img, [0, 1]), -9);
        assert_eq!(pad.at(&img, [isize::MIN, isize::MAX]), -9);
    }

    #[test]
    fn repeat_clamps_each_axis() {
        let img = row();
        assert_eq!(RepeatPadding.at(&img, [-3, 0]), RepeatPadding.at(&img, [0, 0]));
        assert_eq!(RepeatPadding.at(&img, [-3, 0]), 1);
        assert_eq!(RepeatPadding.at(&img, [7, 0]), RepeatPadding.at(&img, [4, 0]));
        assert_eq!(RepeatPadding.at(&img, [7, 0]), 5);
        assert_eq!(RepeatPadding.at(&img, [2, -40]), 3);
    }

    #[test]
    fn periodic_mirrors_at_the_edges() {
        let img = row();
        assert_eq!(PeriodicPadding.at(&img, [5, 0]), PeriodicPadding.at(&img, [4, 0]));
        assert_eq!(PeriodicPadding.at(&img, [5, 0]), 5);
        assert_eq!(PeriodicPadding.at(&img, [-1, 0]), PeriodicPadding.at(&img, [0, 0]));
        assert_eq!(PeriodicPadding.at(&img, [-1, 0]), 1);
    }

    #[test]
    fn periodic_index_table() {
        // L = 5: the mirrored tiling has period 10.
        let expected: [(isize, usize); 14] = [
            (0, 0),
            (4, 4),
            (5, 4),
            (6, 3),
            (9, 0),
            (10, 0),
            (13, 3),
            (-1, 0),
            (-2, 1),
            (-5, 4),
            (-6, 4),
            (-9, 1),
            (-10, 0),
            (-11, 0),
        ];
        for (x, y) in expected {
            assert_eq!(periodic_index(x, 5), y, "x = {x}");
        }
    }

    #[test]
    fn periodic_index_is_total() {
        for len in 1..7usize {
            for x in -50isize..50 {
                assert!(periodic_index(x, len) < len);
            }
        }
        assert!(periodic_index(isize::MAX, 3) < 3);
        assert!(periodic_index(isize::MIN + 1, 3) < 3);
        assert!(periodic_index(isize::MIN, 3) < 3);
        assert!(periodic_index(isize::MIN, 1) == 0);
        let row = Image::from_vec([5, 1], vec![1u8, 2, 3, 4, 5]).unwrap();
        let far = PeriodicPadding.at(&row, [isize::MIN, 0]);
        assert!(row.as_slice().contains(&far));
    }

    #[test]
    fn policies_apply_per_axis_in_3d() {
        let data: Vec<u8> = (0..24).collect();
        let vol = Image::from_vec([2, 3, 4], data).unwrap();
        assert_eq!(RepeatPadding.at(&vol, [-1, 5, 2]), *vol.at([0, 2, 2]));
        assert_eq!(PeriodicPadding.at(&vol, [2, -1, 4]), *vol.at([1, 0, 3]));
        assert_eq!(ConstantPadding(99).at(&vol, [0, 0, 4]), 99);
    }

    #[test]
    fn boundary_mode_dispatches() {
        let img = Image::from_vec([3, 1], vec![1.0f32, 2.0, 3.0]).unwrap();
        assert_eq!(BoundaryMode::Constant(0.5).at(&img, [-1, 0]), 0.5);
        assert_eq!(BoundaryMode::Repeat.at(&img, [10, 0]), 3.0);
        assert_eq!(BoundaryMode::Periodic.at(&img, [3, 0]), 3.0);
    }
}

//! Candidate keypoints from a dense cornerness map.
//!
//! Candidates are local maxima of `R` above a threshold, found by a row-major
//! scan with a square suppression window.
//!
//! Tie-break: a sample is suppressed by any strictly larger neighbor and by an
//! *equal* neighbor that comes earlier in scan order. Of a plateau of equal
//! maxima only the first-seen sample survives, so detection does not depend
//! on iteration details and is reproducible.
use crate::{HarrisParams, ResponseMap};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A cornerness maximum.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// Subpixel location in the response map's coordinates (x, y).
    pub xy: [f32; 2],
    /// Response at the integer peak (before refinement).
    pub strength: f32,
    /// Scale index inside the octave; 0 for single-map detection.
    pub scale: usize,
}

/// Core detector: threshold + NMS + refinement on one response map.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(resp, params), fields(w = resp.w, h = resp.h))
)]
pub fn detect_candidates(resp: &ResponseMap, params: &HarrisParams) -> Vec<Candidate> {
    let w = resp.w;
    let h = resp.h;
    if w == 0 || h == 0 {
        return Vec::new();
    }

    // Don’t use a negative threshold; edges have negative R.
    let thr = params.cornerness_threshold.max(0.0);
    let r = params.nms_radius as isize;

    let mut out = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let v = resp.at(x, y);
            if !(v >= thr) || v <= 0.0 {
                continue;
            }
            if !survives_window(resp, x, y, r, v, false) {
                continue;
            }
            out.push(Candidate {
                xy: refine_com_3x3(resp, x, y),
                strength: v,
                scale: 0,
            });
        }
    }
    out
}

/// Same rule over a `(scale, y, x)` neighborhood: a sample must also dominate
/// the 3×3 windows of the adjacent scales. Scan order is scale-major, so an
/// equal sample at a lower scale wins.
///
/// `maps` are the response maps of one octave, ordered by scale; they must
/// share dimensions. The first and last scales only compare against their
/// single neighbor.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(maps, params), fields(scales = maps.len()))
)]
pub fn detect_scale_space_candidates(
    maps: &[ResponseMap],
    params: &HarrisParams,
) -> Vec<Candidate> {
    let Some(first) = maps.first() else {
        return Vec::new();
    };
    let (w, h) = (first.w, first.h);
    debug_assert!(maps.iter().all(|m| m.w == w && m.h == h));

    let thr = params.cornerness_threshold.max(0.0);
    let r = params.nms_radius as isize;

    let mut out = Vec::new();
    for (s, resp) in maps.iter().enumerate() {
        for y in 0..h {
            for x in 0..w {
                let v = resp.at(x, y);
                if !(v >= thr) || v <= 0.0 {
                    continue;
                }
                if !survives_window(resp, x, y, r, v, false) {
                    continue;
                }
                // Lower scale is scanned earlier: equal values there win.
                if s > 0 && !survives_window(&maps[s - 1], x, y, 1, v, true) {
                    continue;
                }
                if s + 1 < maps.len() && !dominates_later(&maps[s + 1], x, y, v) {
                    continue;
                }
                out.push(Candidate {
                    xy: refine_com_3x3(resp, x, y),
                    strength: v,
                    scale: s,
                });
            }
        }
    }
    out
}

/// Whether `v` at `(x, y)` survives the window of radius `r` in `resp`.
///
/// With `earlier_map` set, the whole window was scanned before the current
/// sample, so any equal value suppresses it. Otherwise only equal values at
/// earlier row-major positions do.
fn survives_window(
    resp: &ResponseMap,
    x: usize,
    y: usize,
    r: isize,
    v: f32,
    earlier_map: bool,
) -> bool {
    let w = resp.w as isize;
    let h = resp.h as isize;
    let cx = x as isize;
    let cy = y as isize;

    for dy in -r..=r {
        for dx in -r..=r {
            if dx == 0 && dy == 0 && !earlier_map {
                continue;
            }
            let xx = cx + dx;
            let yy = cy + dy;
            if xx < 0 || yy < 0 || xx >= w || yy >= h {
                continue;
            }
            let vv = resp.at(xx as usize, yy as usize);
            if vv > v {
                return false;
            }
            let scanned_before = earlier_map || dy < 0 || (dy == 0 && dx < 0);
            if vv == v && scanned_before {
                return false;
            }
        }
    }
    true
}

/// The next scale is scanned later: only strictly larger values suppress.
fn dominates_later(resp: &ResponseMap, x: usize, y: usize, v: f32) -> bool {
    let w = resp.w as isize;
    let h = resp.h as isize;
    for dy in -1isize..=1 {
        for dx in -1isize..=1 {
            let xx = x as isize + dx;
            let yy = y as isize + dy;
            if xx < 0 || yy < 0 || xx >= w || yy >= h {
                continue;
            }
            if resp.at(xx as usize, yy as usize) > v {
                return false;
            }
        }
    }
    true
}

/// 3×3 center-of-mass refinement around an integer peak.
///
/// Only non-negative responses (max(0, R)) are used so that negative edge
/// lobes don’t bias the estimate. Neighbors outside the map are skipped.
fn refine_com_3x3(resp: &ResponseMap, x: usize, y: usize) -> [f32; 2] {
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sw = 0.0;

    for dy in -1isize..=1 {
        for dx in -1isize..=1 {
            let xx = x as isize + dx;
            let yy = y as isize + dy;
            if xx < 0 || yy < 0 || xx >= resp.w as isize || yy >= resp.h as isize {
                continue;
            }
            let w_px = resp.at(xx as usize, yy as usize).max(0.0);
            sx += xx as f32 * w_px;
            sy += yy as f32 * w_px;
            sw += w_px;
        }
    }

    if sw > 0.0 {
        [sx / sw, sy / sw]
    } else {
        [x as f32, y as f32]
    }
}

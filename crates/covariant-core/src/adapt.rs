//! Iterative affine shape adaptation.
//!
//! Starting from the second-moment matrix Σ of a patch around a keypoint, the
//! adapter looks for the affine transform `T` under which the patch
//! `J(p) = I(c + T·p)` has an isotropic structure tensor:
//!
//! ```text
//! Seeded ──step──▶ Iterating ──step──▶ … ──▶ Converged | Diverged | MaxIterExceeded
//! ```
//!
//! One step:
//!
//! 1. `Σ ← Σ / ‖Σ‖_F` and `Σ = U·Λ·Uᵀ` with `λmin ≤ λmax`;
//! 2. `λmax / λmin − 1 ≤ tol` ⇒ Converged; ratio past the divergence bound or
//!    a degenerate spectrum ⇒ Diverged; iteration cap reached ⇒
//!    MaxIterExceeded;
//! 3. corrective warp `W = U·diag(1/√λ)·Uᵀ`, divided by the largest corrective
//!    radius `1/√λmin` so its largest singular value is exactly 1;
//!    `‖W − I‖_F ≤ tol` ⇒ Converged;
//! 4. `T ← T·W`, so the next patch is `I(c + T·W·p)` and its tensor is
//!    `Wᵀ·Σ·W ∝ I`; a shape whose own anisotropy exceeds the bound ⇒ Diverged;
//! 5. resample the `(2r+1)²` patch through `T` and re-estimate Σ.
//!
//! Divergence and exhaustion are ordinary outcomes; the caller decides what
//! to do with the keypoint.

use crate::boundary::{BoundaryMode, Padding};
use crate::error::{Error, Result};
use crate::image::ImageF32;
use crate::interpolate::interpolate_or_pad;
use crate::observer::{AdaptationObserver, NoopObserver};
use crate::tensor::{gradient, weighted_structure_tensor, StructureTensor};
use nalgebra::{Matrix2, Vector2};
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Limits of the adaptation loop.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AdaptParams {
    /// Number of tensors tested before giving up.
    pub max_iterations: usize,
    /// Accepted deviation of `λmax / λmin` from 1, and of `W` from identity.
    pub convergence_tolerance: f64,
    /// Largest accepted `λmax / λmin`, also applied to the singular value
    /// ratio of the accumulated shape.
    pub divergence_bound: f64,
    /// Patch radius in units of the integration scale.
    pub patch_radius_factor: f64,
    /// Eigenvalues of the normalized tensor at or below this are singular.
    pub singular_epsilon: f64,
}

impl Default for AdaptParams {
    fn default() -> Self {
        Self {
            max_iterations: 16,
            convergence_tolerance: 0.05,
            divergence_bound: 6.0,
            patch_radius_factor: 3.0,
            singular_epsilon: 1e-6,
        }
    }
}

impl AdaptParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidParams("max_iterations must be at least 1".into()));
        }
        if !(self.convergence_tolerance > 0.0) {
            return Err(Error::InvalidParams(format!(
                "convergence_tolerance must be positive, got {}",
                self.convergence_tolerance
            )));
        }
        if !(self.divergence_bound > 1.0 + self.convergence_tolerance) {
            return Err(Error::InvalidParams(format!(
                "divergence_bound {} must exceed 1 + convergence_tolerance",
                self.divergence_bound
            )));
        }
        if !(self.patch_radius_factor > 0.0) {
            return Err(Error::InvalidParams(format!(
                "patch_radius_factor must be positive, got {}",
                self.patch_radius_factor
            )));
        }
        if !(self.singular_epsilon >= 0.0) {
            return Err(Error::InvalidParams("singular_epsilon must be non-negative".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdaptationState {
    Seeded,
    Iterating,
    Converged,
    Diverged,
    MaxIterExceeded,
}

impl AdaptationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AdaptationState::Converged
                | AdaptationState::Diverged
                | AdaptationState::MaxIterExceeded
        )
    }
}

/// Why an adaptation was abandoned.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DivergenceReason {
    /// Zero tensor, or smallest normalized eigenvalue at or below epsilon.
    Singular,
    NonFinite,
    /// The eigendecomposition did not converge.
    DecompositionFailed,
    /// `λmax / λmin` of the tensor passed the bound.
    EigenRatio(f64),
    /// Singular value ratio of the accumulated transform passed the bound.
    ShapeAnisotropy(f64),
}

/// Result of a converged adaptation.
#[derive(Clone, Debug, PartialEq)]
pub struct AffineShape {
    /// Composed transform `T`, mapping normalized patch coordinates to image
    /// offsets from the keypoint.
    pub transform: Matrix2<f64>,
    /// Direction of the dominant eigenvector of the last tensor, in degrees
    /// within `(-90, 90]`.
    pub orientation_degrees: f64,
    pub iterations: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AdaptationOutcome {
    Converged(AffineShape),
    Diverged { iterations: usize, reason: DivergenceReason },
    MaxIterExceeded { iterations: usize },
}

impl AdaptationOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, AdaptationOutcome::Converged(_))
    }

    pub fn iterations(&self) -> usize {
        match self {
            AdaptationOutcome::Converged(shape) => shape.iterations,
            AdaptationOutcome::Diverged { iterations, .. }
            | AdaptationOutcome::MaxIterExceeded { iterations } => *iterations,
        }
    }

    pub fn state(&self) -> AdaptationState {
        match self {
            AdaptationOutcome::Converged(_) => AdaptationState::Converged,
            AdaptationOutcome::Diverged { .. } => AdaptationState::Diverged,
            AdaptationOutcome::MaxIterExceeded { .. } => AdaptationState::MaxIterExceeded,
        }
    }

    pub fn into_shape(self) -> Option<AffineShape> {
        match self {
            AdaptationOutcome::Converged(shape) => Some(shape),
            _ => None,
        }
    }
}

/// Sorted spectrum of a Frobenius-normalized tensor.
struct Spectrum {
    lambda_min: f64,
    lambda_max: f64,
    eigenvectors: Matrix2<f64>,
    eigenvalues: Vector2<f64>,
    dominant: Vector2<f64>,
}

impl Spectrum {
    fn of(sigma: &StructureTensor, eps: f64) -> core::result::Result<Self, DivergenceReason> {
        if !(sigma.xx.is_finite() && sigma.xy.is_finite() && sigma.yy.is_finite()) {
            return Err(DivergenceReason::NonFinite);
        }
        let norm = sigma.norm();
        if !norm.is_finite() {
            return Err(DivergenceReason::NonFinite);
        }
        if norm <= 0.0 {
            return Err(DivergenceReason::Singular);
        }

        let eig = sigma
            .scaled(1.0 / norm)
            .to_matrix()
            .try_symmetric_eigen(f64::EPSILON, 64)
            .ok_or(DivergenceReason::DecompositionFailed)?;
        let ev = eig.eigenvalues;
        let (imin, imax) = if ev[0] <= ev[1] { (0, 1) } else { (1, 0) };
        let lambda_min = ev[imin];
        let lambda_max = ev[imax];
        if !(lambda_min.is_finite() && lambda_max.is_finite()) {
            return Err(DivergenceReason::NonFinite);
        }
        if lambda_min <= eps {
            return Err(DivergenceReason::Singular);
        }

        Ok(Self {
            lambda_min,
            lambda_max,
            dominant: eig.eigenvectors.column(imax).into_owned(),
            eigenvectors: eig.eigenvectors,
            eigenvalues: ev,
        })
    }

    fn ratio(&self) -> f64 {
        self.lambda_max / self.lambda_min
    }

    /// `U·diag(1/√λ)·Uᵀ · √λmin`.
    fn corrective_warp(&self) -> Matrix2<f64> {
        let radii = self.eigenvalues.map(|l| 1.0 / l.sqrt());
        let u = &self.eigenvectors;
        u * Matrix2::from_diagonal(&radii) * u.transpose() * self.lambda_min.sqrt()
    }

    fn orientation_degrees(&self) -> f64 {
        let mut angle = self.dominant[1].atan2(self.dominant[0]).to_degrees();
        if angle > 90.0 {
            angle -= 180.0;
        } else if angle <= -90.0 {
            angle += 180.0;
        }
        angle
    }
}

/// Ratio of the singular values of `t`, or `None` when `t` is singular.
pub fn shape_anisotropy(t: &Matrix2<f64>) -> Option<f64> {
    let eig = (t.transpose() * t).try_symmetric_eigen(f64::EPSILON, 64)?;
    let ev = eig.eigenvalues;
    let (lo, hi) = (ev[0].min(ev[1]), ev[0].max(ev[1]));
    if !(lo > 0.0) || !hi.is_finite() {
        return None;
    }
    Some((hi / lo).sqrt())
}

/// Patch radius `ceil(factor · σ_i)`, at least 1.
pub fn patch_radius(sigma_i: f64, factor: f64) -> usize {
    ((factor * sigma_i).ceil() as usize).max(1)
}

/// Square patch of side `2·radius + 1` whose sample `(i, j)` reads
/// `image(center + T·(i − radius, j − radius))`. Positions outside the image
/// fall back to `padding`.
pub fn resample_patch<P: Padding<f32>>(
    image: &ImageF32,
    center: [f64; 2],
    transform: &Matrix2<f64>,
    radius: usize,
    padding: &P,
) -> ImageF32 {
    let side = 2 * radius + 1;
    let r = radius as f64;
    let mut patch = ImageF32::new([side, side], 0.0);
    for j in 0..side {
        for i in 0..side {
            let q = transform * Vector2::new(i as f64 - r, j as f64 - r);
            *patch.pixel_mut(i, j) =
                interpolate_or_pad(image, [center[0] + q[0], center[1] + q[1]], padding);
        }
    }
    patch
}

/// One adaptation run around a single keypoint.
///
/// The adapter borrows the (blurred) image the keypoint was found on; all
/// coordinates and `sigma_i` are in that image's pixels.
pub struct AffineShapeAdapter<'a, O = NoopObserver> {
    image: &'a ImageF32,
    center: [f64; 2],
    sigma_i: f64,
    params: AdaptParams,
    boundary: BoundaryMode,
    transform: Matrix2<f64>,
    sigma: StructureTensor,
    iterations: usize,
    state: AdaptationState,
    outcome: Option<AdaptationOutcome>,
    observer: O,
}

impl<'a> AffineShapeAdapter<'a, NoopObserver> {
    /// Seed from the tensor of the unwarped patch around `center`.
    pub fn new(
        image: &'a ImageF32,
        center: [f64; 2],
        sigma_i: f64,
        params: AdaptParams,
        boundary: BoundaryMode,
    ) -> Self {
        let mut adapter = Self::with_seed(
            image,
            center,
            sigma_i,
            params,
            boundary,
            StructureTensor::default(),
        );
        adapter.sigma = adapter.estimate();
        adapter
    }

    /// Seed with a caller-provided tensor instead of estimating one.
    pub fn with_seed(
        image: &'a ImageF32,
        center: [f64; 2],
        sigma_i: f64,
        params: AdaptParams,
        boundary: BoundaryMode,
        seed: StructureTensor,
    ) -> Self {
        Self {
            image,
            center,
            sigma_i,
            params,
            boundary,
            transform: Matrix2::identity(),
            sigma: seed,
            iterations: 0,
            state: AdaptationState::Seeded,
            outcome: None,
            observer: NoopObserver,
        }
    }
}

impl<'a, O: AdaptationObserver> AffineShapeAdapter<'a, O> {
    pub fn with_observer<P: AdaptationObserver>(self, observer: P) -> AffineShapeAdapter<'a, P> {
        AffineShapeAdapter {
            image: self.image,
            center: self.center,
            sigma_i: self.sigma_i,
            params: self.params,
            boundary: self.boundary,
            transform: self.transform,
            sigma: self.sigma,
            iterations: self.iterations,
            state: self.state,
            outcome: self.outcome,
            observer,
        }
    }

    pub fn state(&self) -> AdaptationState {
        self.state
    }

    pub fn transform(&self) -> &Matrix2<f64> {
        &self.transform
    }

    /// Current structure tensor estimate (not normalized).
    pub fn structure_tensor(&self) -> &StructureTensor {
        &self.sigma
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Terminal outcome, once reached.
    pub fn outcome(&self) -> Option<&AdaptationOutcome> {
        self.outcome.as_ref()
    }

    /// Perform one iteration. Calling it in a terminal state does nothing.
    pub fn step(&mut self) -> AdaptationState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.state = AdaptationState::Iterating;
        self.iterations += 1;
        let iteration = self.iterations;
        self.observer.on_iteration_start(iteration, &self.sigma);

        let spectrum = match Spectrum::of(&self.sigma, self.params.singular_epsilon) {
            Ok(s) => s,
            Err(reason) => {
                return self.finish(AdaptationOutcome::Diverged {
                    iterations: iteration,
                    reason,
                })
            }
        };

        let tol = self.params.convergence_tolerance;
        let ratio = spectrum.ratio();
        if ratio - 1.0 <= tol {
            return self.converge(&spectrum);
        }
        if ratio > self.params.divergence_bound {
            return self.finish(AdaptationOutcome::Diverged {
                iterations: iteration,
                reason: DivergenceReason::EigenRatio(ratio),
            });
        }
        if iteration >= self.params.max_iterations {
            return self.finish(AdaptationOutcome::MaxIterExceeded {
                iterations: iteration,
            });
        }

        let w = spectrum.corrective_warp();
        if (w - Matrix2::identity()).norm() <= tol {
            return self.converge(&spectrum);
        }

        self.transform *= w;
        match shape_anisotropy(&self.transform) {
            Some(a) if a <= self.params.divergence_bound => {}
            Some(a) => {
                return self.finish(AdaptationOutcome::Diverged {
                    iterations: iteration,
                    reason: DivergenceReason::ShapeAnisotropy(a),
                })
            }
            None => {
                return self.finish(AdaptationOutcome::Diverged {
                    iterations: iteration,
                    reason: DivergenceReason::Singular,
                })
            }
        }

        self.sigma = self.estimate();
        self.observer.on_iteration_end(iteration, &self.transform, ratio);
        self.state
    }

    /// Step until a terminal state.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip(self), fields(x = self.center[0], y = self.center[1]))
    )]
    pub fn run(mut self) -> AdaptationOutcome {
        while !self.step().is_terminal() {}
        match self.outcome {
            Some(outcome) => outcome,
            // `step` always records an outcome before reporting a terminal state.
            None => AdaptationOutcome::MaxIterExceeded {
                iterations: self.iterations,
            },
        }
    }

    fn converge(&mut self, spectrum: &Spectrum) -> AdaptationState {
        let shape = AffineShape {
            transform: self.transform,
            orientation_degrees: spectrum.orientation_degrees(),
            iterations: self.iterations,
        };
        self.finish(AdaptationOutcome::Converged(shape))
    }

    fn finish(&mut self, outcome: AdaptationOutcome) -> AdaptationState {
        self.state = outcome.state();
        self.observer.on_terminated(&outcome);
        self.outcome = Some(outcome);
        self.state
    }

    fn estimate(&self) -> StructureTensor {
        let radius = patch_radius(self.sigma_i, self.params.patch_radius_factor);
        let patch = resample_patch(
            self.image,
            self.center,
            &self.transform,
            radius,
            &self.boundary,
        );
        let r = radius as f64;
        weighted_structure_tensor(&gradient(&patch), [r, r], self.sigma_i)
    }
}

//! Hooks into the affine adaptation loop.
//!
//! An [`AdaptationObserver`] is called at fixed points of every
//! [`AffineShapeAdapter`](crate::adapt::AffineShapeAdapter) run. All methods
//! default to doing nothing, so implementors override only what they need.

use crate::adapt::AdaptationOutcome;
use crate::tensor::StructureTensor;
use nalgebra::Matrix2;

pub trait AdaptationObserver {
    /// Before the tensor of `iteration` (1-based) is tested.
    fn on_iteration_start(&mut self, _iteration: usize, _sigma: &StructureTensor) {}

    /// After a step that applied a corrective warp. `eigen_ratio` is
    /// `λmax / λmin` of the normalized tensor that drove the warp.
    fn on_iteration_end(
        &mut self,
        _iteration: usize,
        _transform: &Matrix2<f64>,
        _eigen_ratio: f64,
    ) {
    }

    /// Once, when the adapter reaches a terminal state.
    fn on_terminated(&mut self, _outcome: &AdaptationOutcome) {}
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl AdaptationObserver for NoopObserver {}

impl<O: AdaptationObserver + ?Sized> AdaptationObserver for &mut O {
    fn on_iteration_start(&mut self, iteration: usize, sigma: &StructureTensor) {
        (**self).on_iteration_start(iteration, sigma)
    }

    fn on_iteration_end(&mut self, iteration: usize, transform: &Matrix2<f64>, eigen_ratio: f64) {
        (**self).on_iteration_end(iteration, transform, eigen_ratio)
    }

    fn on_terminated(&mut self, outcome: &AdaptationOutcome) {
        (**self).on_terminated(outcome)
    }
}

/// Emits one `trace` event per iteration and a `debug` event on termination.
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

#[cfg(feature = "tracing")]
impl AdaptationObserver for TracingObserver {
    fn on_iteration_start(&mut self, iteration: usize, sigma: &StructureTensor) {
        tracing::trace!(
            iteration,
            xx = sigma.xx,
            xy = sigma.xy,
            yy = sigma.yy,
            "adaptation step"
        );
    }

    fn on_iteration_end(&mut self, iteration: usize, transform: &Matrix2<f64>, eigen_ratio: f64) {
        tracing::trace!(iteration, eigen_ratio, det = transform.determinant(), "warp updated");
    }

    fn on_terminated(&mut self, outcome: &AdaptationOutcome) {
        tracing::debug!(?outcome, "adaptation finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::{AdaptParams, AffineShapeAdapter};
    use crate::boundary::BoundaryMode;
    use crate::image::ImageF32;

    #[derive(Default)]
    struct Recorder {
        starts: Vec<usize>,
        ends: usize,
        terminated: Vec<String>,
    }

    impl AdaptationObserver for Recorder {
        fn on_iteration_start(&mut self, iteration: usize, _sigma: &StructureTensor) {
            self.starts.push(iteration);
        }

        fn on_iteration_end(&mut self, _iteration: usize, _transform: &Matrix2<f64>, _ratio: f64) {
            self.ends += 1;
        }

        fn on_terminated(&mut self, outcome: &AdaptationOutcome) {
            self.terminated.push(format!("{outcome:?}"));
        }
    }

    #[test]
    fn observer_sees_every_step_and_one_termination() {
        let img = ImageF32::new([16, 16], 0.0);
        let mut rec = Recorder::default();
        let adapter = AffineShapeAdapter::with_seed(
            &img,
            [8.0, 8.0],
            1.0,
            AdaptParams::default(),
            BoundaryMode::Repeat,
            StructureTensor::new(1.0, 0.0, 0.0),
        )
        .with_observer(&mut rec);
        let outcome = adapter.run();
        assert!(!outcome.is_converged());
        assert_eq!(rec.starts, vec![1]);
        assert_eq!(rec.ends, 0);
        assert_eq!(rec.terminated.len(), 1);
    }
}

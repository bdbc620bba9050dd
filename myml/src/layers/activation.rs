use ndarray::prelude::*;
use ndarray::Zip;

use crate::{ActivationFn, Layer};

/// Inputs to `Exponential` are clamped to this magnitude so that outputs stay
/// finite in `f32`.
const MAX_EXP_ARG: f32 = 60.0;

/// Layer that applies the same real-valued function to each element.
#[derive(Debug)]
pub struct ActivationLayer<F> {
    f: F,
}

impl<F> ActivationLayer<F>
where
    F: ActivationFn,
{
    pub fn new(f: F) -> Self {
        ActivationLayer { f }
    }
}

impl<D, F> Layer<D> for ActivationLayer<F>
where
    D: Dimension,
    F: ActivationFn,
{
    type Output = D;

    fn output_shape(&self, input_shape: D) -> D {
        input_shape
    }

    fn apply(
        &self,
        _params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        _tmp: ArrayViewMut1<'_, f32>,
        mut y: ArrayViewMut<'_, f32, D>,
    ) {
        let f = self.f;
        Zip::from(&mut y).and(&x).for_each(|y, &x| *y = f.f(x));
    }

    fn derivatives(
        &self,
        _params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        _tmp: ArrayView1<'_, f32>,
        dy: ArrayView<'_, f32, D>,
        _dp: ArrayViewMut1<'_, f32>,
    ) -> Array<f32, D> {
        Zip::from(&x)
            .and(&dy)
            .map_collect(|&x, &dy| self.f.df(x) * dy)
    }
}

/// The logistic function, a handy symmetric, s-shaped function.
#[derive(Debug, Clone, Copy)]
pub struct Sigmoid;

impl ActivationFn for Sigmoid {
    fn f(self, x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    fn df(self, x: f32) -> f32 {
        let y = self.f(x);
        y * (1.0 - y)
    }
}

/// Hyperbolic tangent.
#[derive(Debug, Clone, Copy)]
pub struct Tanh;

impl ActivationFn for Tanh {
    fn f(self, x: f32) -> f32 {
        x.tanh()
    }

    fn df(self, x: f32) -> f32 {
        let y = x.tanh();
        1.0 - y * y
    }
}

/// `e^x`. Always positive, so a dense layer followed by this one makes a
/// learned positive scale factor.
#[derive(Debug, Clone, Copy)]
pub struct Exponential;

impl ActivationFn for Exponential {
    fn f(self, x: f32) -> f32 {
        x.clamp(-MAX_EXP_ARG, MAX_EXP_ARG).exp()
    }

    fn df(self, x: f32) -> f32 {
        if x.abs() < MAX_EXP_ARG {
            x.exp()
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_stays_finite() {
        assert!(Exponential.f(1000.0).is_finite());
        assert!(Exponential.f(-1000.0) > 0.0);
        assert_eq!(Exponential.df(1000.0), 0.0);
        assert!((Exponential.f(1.0) - std::f32::consts::E).abs() < 1e-6);
    }

    #[test]
    fn sigmoid_is_symmetric() {
        for x in [-3.0f32, -0.5, 0.0, 0.25, 4.0] {
            assert!((Sigmoid.f(x) + Sigmoid.f(-x) - 1.0).abs() < 1e-6);
        }
    }
}

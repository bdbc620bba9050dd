use std::fmt::Debug;

use ndarray::prelude::*;

use crate::layers::{ActivationLayer, DenseLayer, Exponential, Sequence};

pub trait Layer<D>: Debug
where
    D: Dimension,
{
    /// Type of the output shape, typically one of `Ix2`, `Ix3`, etc.
    ///
    /// Axis 0 of this is always the mini-batch axis.
    type Output: Dimension;

    /// For input of the given shape, compute the output shape.
    ///
    /// Axis 0 of both `input_shape` and `output_shape` is the mini-batch axis.
    fn output_shape(&self, input_shape: D) -> Self::Output;

    /// Number of parameters required for this layer.
    ///
    /// The caller provides parameters to the other methods as a single flat
    /// array, which the methods will slice up and reshape into whatever they
    /// need.
    fn num_params(&self) -> usize {
        0
    }

    /// Amount of scratch space this layer needs to remember hidden
    /// activations between `apply` and `derivatives`.
    ///
    /// The caller allocates one flat buffer of this size per batch and
    /// passes it to both calls.
    fn num_hidden_activations(&self, _input_shape: D) -> usize {
        0
    }

    /// Compute the output of this layer, given the `params` and the input `x`.
    /// Store the output in `y` and store whatever `derivatives` will need
    /// later in `tmp`.
    ///
    /// Axis 0 of `x` is always the mini-batch axis.
    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        tmp: ArrayViewMut1<'_, f32>,
        y: ArrayViewMut<'_, f32, Self::Output>,
    );

    /// Given x and ∂L/∂y at x, compute partial derivatives ∂L/∂x and ∂L/∂p.
    ///
    /// Store ∂L/∂p in the out-param `dp`, a 1D vector of derivatives laid
    /// out like `params`. Return ∂L/∂x.
    ///
    /// `tmp` must be the buffer filled in by the matching `apply` call.
    fn derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        tmp: ArrayView1<'_, f32>,
        dy: ArrayView<'_, f32, Self::Output>,
        dp: ArrayViewMut1<'_, f32>,
    ) -> Array<f32, D>;

    fn then<L2>(self, other: L2) -> Sequence<Self, L2>
    where
        Self: Sized,
        L2: Layer<Self::Output>,
    {
        Sequence::new(self, other)
    }

    fn exponential(self) -> Sequence<Self, ActivationLayer<Exponential>>
    where
        Self: Sized,
    {
        self.then(ActivationLayer::new(Exponential))
    }

    /// Append a fully connected layer with weights and biases.
    fn dense(self, num_inputs: usize, num_outputs: usize) -> Sequence<Self, DenseLayer>
    where
        Self: Sized + Layer<D, Output = Ix2>,
    {
        self.then(DenseLayer::new(num_inputs, num_outputs))
    }
}

pub trait ActivationFn: Copy + Clone + Debug {
    fn f(self, x: f32) -> f32;
    fn df(self, x: f32) -> f32;
}

/// Something that turns gradients into parameter updates.
pub trait Optimizer: Debug {
    /// Update `params` in place, given ∂L/∂p for the current batch.
    fn update(&mut self, params: ArrayViewMut1<'_, f32>, grads: ArrayView1<'_, f32>);

    /// The step size that will be used for the next update.
    fn learning_rate(&self) -> f32;
}

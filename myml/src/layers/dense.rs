use ndarray::prelude::*;

use crate::Layer;

/// A fully connected layer: `y = x W + b`.
///
/// Parameters are laid out as the weight matrix `W` with shape `(ni, no)` in
/// row-major order, followed by the bias vector `b` of length `no`. Callers
/// that need to read the same weights outside the layer can use
/// [`DenseLayer::weights`] to get views with exactly this layout.
#[derive(Debug)]
pub struct DenseLayer {
    /// Number of inputs. Input shape is `(N, ni)`.
    ni: usize,
    /// Number of cells, i.e. outputs. Output shape is `(N, no)`.
    no: usize,
}

impl DenseLayer {
    pub fn new(num_inputs: usize, num_outputs: usize) -> Self {
        DenseLayer {
            ni: num_inputs,
            no: num_outputs,
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.ni
    }

    pub fn num_outputs(&self) -> usize {
        self.no
    }

    /// Split `params` into the weight matrix and the bias vector.
    pub fn weights<'a>(&self, params: ArrayView1<'a, f32>) -> (ArrayView2<'a, f32>, ArrayView1<'a, f32>) {
        assert_eq!(params.len(), self.num_params());
        let (w, b) = params.split_at(Axis(0), self.ni * self.no);
        let w = w
            .into_shape((self.ni, self.no))
            .expect("params should be contiguous");
        (w, b)
    }
}

impl Layer<Ix2> for DenseLayer {
    type Output = Ix2;

    fn output_shape(&self, input_shape: Ix2) -> Ix2 {
        Ix2(input_shape[0], self.no)
    }

    fn num_params(&self) -> usize {
        self.ni * self.no + self.no
    }

    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        _tmp: ArrayViewMut1<'_, f32>,
        mut y: ArrayViewMut2<'_, f32>,
    ) {
        assert_eq!(x.shape()[1], self.ni);
        let (w, b) = self.weights(params);
        y.assign(&(x.dot(&w) + &b));
    }

    fn derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView2<'_, f32>,
        _tmp: ArrayView1<'_, f32>,
        dy: ArrayView2<'_, f32>,
        dp: ArrayViewMut1<'_, f32>,
    ) -> Array2<f32> {
        let n = x.shape()[0];
        assert_eq!(x.shape()[1], self.ni);
        assert_eq!(dy.shape(), [n, self.no]);
        let (w, _) = self.weights(params);

        let (dw, mut db) = dp.split_at(Axis(0), self.ni * self.no);
        let mut dw = dw
            .into_shape((self.ni, self.no))
            .expect("dp should be contiguous");
        dw.assign(&x.t().dot(&dy));
        db.assign(&dy.sum_axis(Axis(0)));

        dy.dot(&w.t())
    }
}

use ndarray::prelude::*;
use ndarray::Zip;

/// Lookup table mapping token ids to dense vectors.
///
/// This can't implement `Layer`, because its input is integer ids rather than
/// `f32` activations, and there is no derivative with respect to the input.
/// Otherwise it follows the same conventions: parameters come in as a flat
/// slice, a `(vocab_size, dims)` matrix in row-major order.
#[derive(Debug)]
pub struct Embedding {
    vocab_size: usize,
    dims: usize,
}

impl Embedding {
    pub fn new(vocab_size: usize, dims: usize) -> Self {
        Embedding { vocab_size, dims }
    }

    pub fn num_params(&self) -> usize {
        self.vocab_size * self.dims
    }

    pub fn output_shape(&self, input_shape: Ix2) -> Ix3 {
        Ix3(input_shape[0], input_shape[1], self.dims)
    }

    fn table<'a>(&self, params: ArrayView1<'a, f32>) -> ArrayView2<'a, f32> {
        params
            .into_shape((self.vocab_size, self.dims))
            .expect("size of params should be self.num_params()")
    }

    /// Look up every id in `ids`, storing the vectors in `y`.
    ///
    /// *Panics* if an id is out of range. Callers are expected to have mapped
    /// unknown tokens to a valid id already.
    pub fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        ids: ArrayView2<'_, usize>,
        mut y: ArrayViewMut3<'_, f32>,
    ) {
        let table = self.table(params);
        assert_eq!(y.raw_dim(), self.output_shape(ids.raw_dim()));
        Zip::from(y.lanes_mut(Axis(2)))
            .and(&ids)
            .for_each(|mut row, &id| {
                assert!(id < self.vocab_size, "token id {id} out of range");
                row.assign(&table.row(id));
            });
    }

    /// Accumulate ∂L/∂table from ∂L/∂y into `dp`. Rows for ids that appear
    /// more than once get the sum of their gradients.
    pub fn derivatives(
        &self,
        ids: ArrayView2<'_, usize>,
        dy: ArrayView3<'_, f32>,
        dp: ArrayViewMut1<'_, f32>,
    ) {
        let mut dtable = dp
            .into_shape((self.vocab_size, self.dims))
            .expect("size of dp should be self.num_params()");
        dtable.fill(0.0);
        Zip::from(dy.lanes(Axis(2))).and(&ids).for_each(|row, &id| {
            let mut drow = dtable.row_mut(id);
            drow += &row;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_scatter() {
        let layer = Embedding::new(3, 2);
        let params = array![0.0f32, 1.0, 10.0, 11.0, 20.0, 21.0];
        let ids = array![[2usize, 0], [2, 1]];
        let mut y = Array3::zeros(layer.output_shape(ids.raw_dim()));
        layer.apply(params.view(), ids.view(), y.view_mut());
        assert_eq!(y.slice(s![0, 0, ..]), array![20.0, 21.0]);
        assert_eq!(y.slice(s![1, 1, ..]), array![10.0, 11.0]);

        let dy = Array3::ones(y.raw_dim());
        let mut dp = Array1::zeros(layer.num_params());
        layer.derivatives(ids.view(), dy.view(), dp.view_mut());
        assert_eq!(dp, array![1.0, 1.0, 1.0, 1.0, 2.0, 2.0]);
    }
}

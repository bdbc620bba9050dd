//! Output scoring: the shared output matrix, read two ways.

use ndarray::prelude::*;

use myml::layers::DenseLayer;
use myml::Layer;

use crate::sampler::UnigramTable;

/// The vocabulary projection `h W + b`.
///
/// Training only ever needs the scores of a few candidate tokens per
/// position, so [`partial_logits`](Self::partial_logits) gathers just those
/// columns. Evaluation needs every column, so
/// [`exact_logits`](Self::exact_logits) runs the whole dense layer. Both read
/// the same parameter slice, so there is exactly one copy of `W` and `b`.
#[derive(Debug)]
pub struct SoftmaxScorer {
    dense: DenseLayer,
}

impl SoftmaxScorer {
    pub fn new(context_dims: usize, vocab_size: usize) -> Self {
        SoftmaxScorer {
            dense: DenseLayer::new(context_dims, vocab_size),
        }
    }

    pub fn num_params(&self) -> usize {
        self.dense.num_params()
    }

    pub fn context_dims(&self) -> usize {
        self.dense.num_inputs()
    }

    pub fn vocab_size(&self) -> usize {
        self.dense.num_outputs()
    }

    /// `W` with shape `(context_dims, vocab_size)` and `b`.
    pub fn weights<'a>(&self, params: ArrayView1<'a, f32>) -> (ArrayView2<'a, f32>, ArrayView1<'a, f32>) {
        self.dense.weights(params)
    }

    /// `s[k, i, t] = h[i, t] · W[:, ids[k, i, t]] + b[ids[k, i, t]]`.
    ///
    /// `ids` is an augmented batch `(slots, N, T)`; `h` is the context
    /// `(N, T, context_dims)`.
    pub fn partial_logits(
        &self,
        params: ArrayView1<'_, f32>,
        ids: ArrayView3<'_, usize>,
        h: ArrayView3<'_, f32>,
    ) -> Array3<f32> {
        let (slots, n, steps) = ids.dim();
        assert_eq!(h.dim(), (n, steps, self.context_dims()));
        let (w, b) = self.weights(params);
        Array3::from_shape_fn((slots, n, steps), |(k, i, t)| {
            let id = ids[[k, i, t]];
            h.slice(s![i, t, ..]).dot(&w.column(id)) + b[id]
        })
    }

    /// Backpropagate `ds = ∂L/∂s` through [`partial_logits`](Self::partial_logits).
    ///
    /// Stores ∂L/∂W and ∂L/∂b in `dp` and returns ∂L/∂h. Only the columns of
    /// tokens that appear in `ids` get nonzero gradient.
    pub fn partial_derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        ids: ArrayView3<'_, usize>,
        h: ArrayView3<'_, f32>,
        ds: ArrayView3<'_, f32>,
        dp: ArrayViewMut1<'_, f32>,
    ) -> Array3<f32> {
        assert_eq!(ids.shape(), ds.shape());
        let (w, _) = self.weights(params);
        let (dw, mut db) = dp.split_at(Axis(0), self.context_dims() * self.vocab_size());
        let mut dw = dw
            .into_shape((self.context_dims(), self.vocab_size()))
            .expect("dp should be contiguous");
        dw.fill(0.0);
        db.fill(0.0);

        let mut dh = Array3::<f32>::zeros(h.raw_dim());
        for ((k, i, t), &g) in ds.indexed_iter() {
            if g == 0.0 {
                continue;
            }
            let id = ids[[k, i, t]];
            dw.column_mut(id).scaled_add(g, &h.slice(s![i, t, ..]));
            db[id] += g;
            dh.slice_mut(s![i, t, ..]).scaled_add(g, &w.column(id));
        }
        dh
    }

    /// Scores for every vocabulary item: `(rows, context_dims)` in,
    /// `(rows, vocab_size)` out.
    pub fn exact_logits(&self, params: ArrayView1<'_, f32>, h: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut tmp = Array1::zeros(self.dense.num_hidden_activations(h.raw_dim()));
        let mut y = Array2::zeros(self.dense.output_shape(h.raw_dim()));
        self.dense.apply(params, h, tmp.view_mut(), y.view_mut());
        y
    }
}

/// Noise probability of each token in an augmented batch.
#[derive(Debug, Clone)]
pub struct NoiseLookup {
    table: UnigramTable,
}

impl NoiseLookup {
    pub fn new(table: UnigramTable) -> Self {
        NoiseLookup { table }
    }

    pub fn lookup(&self, ids: ArrayView3<'_, usize>) -> Array3<f32> {
        ids.map(|&id| self.table.prob(id))
    }
}

#[cfg(test)]
mod tests {
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    use super::*;

    #[test]
    fn partial_scores_are_columns_of_exact_scores() {
        let scorer = SoftmaxScorer::new(3, 5);
        let params = Array1::random(scorer.num_params(), Uniform::new(-1.0, 1.0));
        let h = Array3::random((2, 4, 3), Uniform::new(-1.0, 1.0));
        let ids = array![
            [[0usize, 1, 2, 3], [4, 3, 2, 1]],
            [[4, 4, 0, 0], [1, 2, 1, 2]]
        ];

        let partial = scorer.partial_logits(params.view(), ids.view(), h.view());
        let flat = h.view().into_shape((8, 3)).unwrap();
        let exact = scorer.exact_logits(params.view(), flat);
        for ((k, i, t), &s) in partial.indexed_iter() {
            let want = exact[[i * 4 + t, ids[[k, i, t]]]];
            assert!((s - want).abs() < 1e-5, "slot {k} ({i}, {t}): {s} vs {want}");
        }
    }

    #[test]
    fn partial_derivatives_match_finite_differences() {
        let scorer = SoftmaxScorer::new(2, 4);
        let mut params = Array1::random(scorer.num_params(), Uniform::new(-1.0, 1.0));
        let mut h = Array3::random((1, 3, 2), Uniform::new(-1.0, 1.0));
        let ids = array![[[0usize, 3, 3]], [[2, 0, 1]]];
        let ds = Array3::random(ids.raw_dim(), Uniform::new(-1.0, 1.0));

        let mut dp = Array1::zeros(scorer.num_params());
        let dh = scorer.partial_derivatives(params.view(), ids.view(), h.view(), ds.view(), dp.view_mut());

        let objective = |params: &Array1<f32>, h: &Array3<f32>| {
            (scorer.partial_logits(params.view(), ids.view(), h.view()) * &ds).sum()
        };
        let step = 1e-2;
        for i in 0..params.len() {
            let saved = params[i];
            params[i] = saved + step;
            let plus = objective(&params, &h);
            params[i] = saved - step;
            let minus = objective(&params, &h);
            params[i] = saved;
            let measured = (plus - minus) / (2.0 * step);
            assert!((dp[i] - measured).abs() < 1e-3, "param {i}: {} vs {measured}", dp[i]);
        }
        for idx in ndarray::indices(h.raw_dim()) {
            let saved = h[idx];
            h[idx] = saved + step;
            let plus = objective(&params, &h);
            h[idx] = saved - step;
            let minus = objective(&params, &h);
            h[idx] = saved;
            let measured = (plus - minus) / (2.0 * step);
            assert!((dh[idx] - measured).abs() < 1e-3, "h{idx:?}: {} vs {measured}", dh[idx]);
        }
    }

    #[test]
    fn noise_lookup_reads_table() {
        let lookup = NoiseLookup::new(UnigramTable::from_counts(&[1, 1, 2]).unwrap());
        let q = lookup.lookup(array![[[0usize, 2]], [[1, 1]]].view());
        assert_eq!(q, array![[[0.25f32, 0.5]], [[0.25, 0.25]]]);
    }
}

use ndarray::prelude::*;

use crate::Layer;

/// Two layers run back to back. Built with [`Layer::then`].
///
/// Parameters are the first layer's followed by the second's. The scratch
/// buffer holds, in order: the first layer's scratch, the intermediate
/// activations, and the second layer's scratch.
#[derive(Debug)]
pub struct Sequence<L1, L2> {
    first: L1,
    second: L2,
    first_num_params: usize,
    num_params: usize,
}

impl<L1, L2> Sequence<L1, L2> {
    pub(crate) fn new<D>(first: L1, second: L2) -> Self
    where
        D: Dimension,
        L1: Layer<D>,
        L2: Layer<L1::Output>,
    {
        let first_num_params = first.num_params();
        let num_params = first_num_params + second.num_params();
        Sequence {
            first,
            second,
            first_num_params,
            num_params,
        }
    }
}

impl<L1, L2, D> Layer<D> for Sequence<L1, L2>
where
    D: Dimension,
    L1: Layer<D>,
    L2: Layer<L1::Output>,
{
    type Output = L2::Output;

    fn output_shape(&self, input_shape: D) -> Self::Output {
        self.second.output_shape(self.first.output_shape(input_shape))
    }

    fn num_params(&self) -> usize {
        self.num_params
    }

    fn num_hidden_activations(&self, input_shape: D) -> usize {
        let mid_shape = self.first.output_shape(input_shape.clone());
        self.first.num_hidden_activations(input_shape)
            + mid_shape.size()
            + self.second.num_hidden_activations(mid_shape)
    }

    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        tmp: ArrayViewMut1<'_, f32>,
        y: ArrayViewMut<'_, f32, Self::Output>,
    ) {
        let input_shape = x.raw_dim();
        let mid_shape = self.first.output_shape(input_shape.clone());
        let (tmp1, rest) = tmp.split_at(Axis(0), self.first.num_hidden_activations(input_shape));
        let (mid, tmp2) = rest.split_at(Axis(0), mid_shape.size());
        let mut mid = mid
            .into_shape(mid_shape)
            .expect("tmp should be contiguous and sized for first layer output");

        let (p1, p2) = params.split_at(Axis(0), self.first_num_params);
        self.first.apply(p1, x, tmp1, mid.view_mut());
        self.second.apply(p2, mid.view(), tmp2, y);
    }

    fn derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView<'_, f32, D>,
        tmp: ArrayView1<'_, f32>,
        dy: ArrayView<'_, f32, Self::Output>,
        dp: ArrayViewMut1<'_, f32>,
    ) -> Array<f32, D> {
        let (p1, p2) = params.split_at(Axis(0), self.first_num_params);
        let (dp1, dp2) = dp.split_at(Axis(0), self.first_num_params);

        // The first layer's output was saved by `apply`; no need to rerun it.
        let input_shape = x.raw_dim();
        let mid_shape = self.first.output_shape(input_shape.clone());
        let start = self.first.num_hidden_activations(input_shape);
        let end = start + mid_shape.size();
        let mid = tmp
            .slice(s![start..end])
            .into_shape(mid_shape)
            .expect("tmp should be contiguous and sized for first layer output");

        let dmid = self
            .second
            .derivatives(p2, mid, tmp.slice(s![end..]), dy, dp2);
        self.first
            .derivatives(p1, x, tmp.slice(s![..start]), dmid.view(), dp1)
    }
}

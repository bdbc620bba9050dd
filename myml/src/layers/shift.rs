use ndarray::prelude::*;

use crate::Layer;

/// Delays a sequence by one step along the time axis (axis 1).
///
/// Input and output shape are `(N, T, k)`. Output step 0 is all zeros and
/// output step `t` is input step `t - 1`, so a recurrent layer placed after
/// this one sees only strictly earlier inputs at each step.
#[derive(Debug, Default)]
pub struct ShiftLayer;

impl ShiftLayer {
    pub fn new() -> Self {
        ShiftLayer
    }
}

impl Layer<Ix3> for ShiftLayer {
    type Output = Ix3;

    fn output_shape(&self, input_shape: Ix3) -> Ix3 {
        input_shape
    }

    fn apply(
        &self,
        _params: ArrayView1<'_, f32>,
        x: ArrayView3<'_, f32>,
        _tmp: ArrayViewMut1<'_, f32>,
        mut y: ArrayViewMut3<'_, f32>,
    ) {
        let t = x.len_of(Axis(1));
        if t == 0 {
            return;
        }
        y.slice_mut(s![.., 0, ..]).fill(0.0);
        y.slice_mut(s![.., 1.., ..]).assign(&x.slice(s![.., ..t - 1, ..]));
    }

    fn derivatives(
        &self,
        _params: ArrayView1<'_, f32>,
        x: ArrayView3<'_, f32>,
        _tmp: ArrayView1<'_, f32>,
        dy: ArrayView3<'_, f32>,
        _dp: ArrayViewMut1<'_, f32>,
    ) -> Array3<f32> {
        let t = x.len_of(Axis(1));
        let mut dx = Array3::zeros(x.raw_dim());
        if t > 0 {
            dx.slice_mut(s![.., ..t - 1, ..])
                .assign(&dy.slice(s![.., 1.., ..]));
        }
        dx
    }
}

use ndarray::prelude::*;

use super::{Sigmoid, Tanh};
use crate::{ActivationFn, Layer};

/// Number of floats saved per example per time step: four gate activations,
/// the cell state and the output.
const SAVED_PER_CELL: usize = 6;

/// Long short-term memory layer, run over a whole sequence.
///
/// Input shape is `(N, T, ni)`, output shape is `(N, T, no)`; output step `t`
/// is the hidden state after reading input steps `0..=t`. The initial hidden
/// and cell states are zero.
///
/// Parameters, in order: input weights `W` `(ni, 4*no)`, recurrent weights
/// `U` `(no, 4*no)`, bias `b` `(4*no)`. The four column blocks are the input,
/// forget, candidate and output gates.
#[derive(Debug)]
pub struct LstmLayer {
    ni: usize,
    no: usize,
}

impl LstmLayer {
    pub fn new(num_inputs: usize, num_outputs: usize) -> Self {
        LstmLayer {
            ni: num_inputs,
            no: num_outputs,
        }
    }

    fn weights<'a>(
        &self,
        params: ArrayView1<'a, f32>,
    ) -> (ArrayView2<'a, f32>, ArrayView2<'a, f32>, ArrayView1<'a, f32>) {
        let g = 4 * self.no;
        let (w, rest) = params.split_at(Axis(0), self.ni * g);
        let (u, b) = rest.split_at(Axis(0), self.no * g);
        (
            w.into_shape((self.ni, g))
                .expect("params should be contiguous"),
            u.into_shape((self.no, g))
                .expect("params should be contiguous"),
            b,
        )
    }
}

impl Layer<Ix3> for LstmLayer {
    type Output = Ix3;

    fn output_shape(&self, input_shape: Ix3) -> Ix3 {
        Ix3(input_shape[0], input_shape[1], self.no)
    }

    fn num_params(&self) -> usize {
        4 * self.no * (self.ni + self.no + 1)
    }

    fn num_hidden_activations(&self, input_shape: Ix3) -> usize {
        input_shape[0] * input_shape[1] * SAVED_PER_CELL * self.no
    }

    fn apply(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView3<'_, f32>,
        tmp: ArrayViewMut1<'_, f32>,
        mut y: ArrayViewMut3<'_, f32>,
    ) {
        let (n, steps, ni) = x.dim();
        let no = self.no;
        assert_eq!(ni, self.ni);
        let (w, u, b) = self.weights(params);
        let mut saved = tmp
            .into_shape((n, steps, SAVED_PER_CELL * no))
            .expect("tmp should be contiguous and sized by num_hidden_activations");

        let mut h = Array2::<f32>::zeros((n, no));
        let mut c = Array2::<f32>::zeros((n, no));
        for t in 0..steps {
            let a = x.slice(s![.., t, ..]).dot(&w) + h.dot(&u) + &b;
            let i_g = a.slice(s![.., ..no]).mapv(|v| Sigmoid.f(v));
            let f_g = a.slice(s![.., no..2 * no]).mapv(|v| Sigmoid.f(v));
            let g_g = a.slice(s![.., 2 * no..3 * no]).mapv(|v| Tanh.f(v));
            let o_g = a.slice(s![.., 3 * no..]).mapv(|v| Sigmoid.f(v));

            c = &f_g * &c + &i_g * &g_g;
            h = &o_g * &c.mapv(|v| Tanh.f(v));

            let mut cell = saved.slice_mut(s![.., t, ..]);
            cell.slice_mut(s![.., ..no]).assign(&i_g);
            cell.slice_mut(s![.., no..2 * no]).assign(&f_g);
            cell.slice_mut(s![.., 2 * no..3 * no]).assign(&g_g);
            cell.slice_mut(s![.., 3 * no..4 * no]).assign(&o_g);
            cell.slice_mut(s![.., 4 * no..5 * no]).assign(&c);
            cell.slice_mut(s![.., 5 * no..]).assign(&h);
            y.slice_mut(s![.., t, ..]).assign(&h);
        }
    }

    fn derivatives(
        &self,
        params: ArrayView1<'_, f32>,
        x: ArrayView3<'_, f32>,
        tmp: ArrayView1<'_, f32>,
        dy: ArrayView3<'_, f32>,
        dp: ArrayViewMut1<'_, f32>,
    ) -> Array3<f32> {
        let (n, steps, ni) = x.dim();
        let no = self.no;
        let g = 4 * no;
        assert_eq!(ni, self.ni);
        assert_eq!(dy.dim(), (n, steps, no));
        let (w, u, _) = self.weights(params);
        let saved = tmp
            .into_shape((n, steps, SAVED_PER_CELL * no))
            .expect("tmp should be contiguous and sized by num_hidden_activations");

        let mut gw = Array2::<f32>::zeros((ni, g));
        let mut gu = Array2::<f32>::zeros((no, g));
        let mut gb = Array1::<f32>::zeros(g);
        let mut dx = Array3::<f32>::zeros(x.raw_dim());

        // Gradients flowing back into step t from step t + 1.
        let mut dh_next = Array2::<f32>::zeros((n, no));
        let mut dc_next = Array2::<f32>::zeros((n, no));

        for t in (0..steps).rev() {
            let cell = saved.slice(s![.., t, ..]);
            let i_g = cell.slice(s![.., ..no]);
            let f_g = cell.slice(s![.., no..2 * no]);
            let g_g = cell.slice(s![.., 2 * no..3 * no]);
            let o_g = cell.slice(s![.., 3 * no..4 * no]);
            let c = cell.slice(s![.., 4 * no..5 * no]);
            let (c_prev, h_prev) = if t == 0 {
                (Array2::zeros((n, no)), Array2::zeros((n, no)))
            } else {
                let prev = saved.slice(s![.., t - 1, ..]);
                (
                    prev.slice(s![.., 4 * no..5 * no]).to_owned(),
                    prev.slice(s![.., 5 * no..]).to_owned(),
                )
            };

            let dh = &dy.slice(s![.., t, ..]) + &dh_next;
            let tanh_c = c.mapv(|v| Tanh.f(v));
            let d_o = &dh * &tanh_c;
            let dc = &dc_next + &(&dh * &o_g * tanh_c.mapv(|v| 1.0 - v * v));

            let di = &dc * &g_g;
            let dg = &dc * &i_g;
            let df = &dc * &c_prev;
            dc_next = &dc * &f_g;

            let mut da = Array2::<f32>::zeros((n, g));
            da.slice_mut(s![.., ..no])
                .assign(&(di * i_g.mapv(|v| v * (1.0 - v))));
            da.slice_mut(s![.., no..2 * no])
                .assign(&(df * f_g.mapv(|v| v * (1.0 - v))));
            da.slice_mut(s![.., 2 * no..3 * no])
                .assign(&(dg * g_g.mapv(|v| 1.0 - v * v)));
            da.slice_mut(s![.., 3 * no..])
                .assign(&(d_o * o_g.mapv(|v| v * (1.0 - v))));

            gw += &x.slice(s![.., t, ..]).t().dot(&da);
            gu += &h_prev.t().dot(&da);
            gb += &da.sum_axis(Axis(0));
            dx.slice_mut(s![.., t, ..]).assign(&da.dot(&w.t()));
            dh_next = da.dot(&u.t());
        }

        let (dw, rest) = dp.split_at(Axis(0), ni * g);
        let (du, mut db) = rest.split_at(Axis(0), no * g);
        dw.into_shape((ni, g))
            .expect("dp should be contiguous")
            .assign(&gw);
        du.into_shape((no, g))
            .expect("dp should be contiguous")
            .assign(&gu);
        db.assign(&gb);
        dx
    }
}

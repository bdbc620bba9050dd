//! Tests that check for consistency between `apply` and `derivatives`.

use ndarray::prelude::*;
use ndarray::IntoDimension;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use myml::layers::{DenseLayer, LstmLayer, ShiftLayer};
use myml::*;

fn test_layer<L, D>(layer: L, input_shape: D, error_limit: f32)
where
    D: IntoDimension,
    L: Layer<D::Dim>,
{
    let input_shape = input_shape.into_dimension();
    let output_shape = layer.output_shape(input_shape.clone());

    let n = layer.num_params();
    let mut params = Array::random(n, Uniform::new(-0.5, 0.5));
    let mut x = Array::random(input_shape.clone(), Uniform::new(-1.0, 1.0));
    let mut tmp = Array1::zeros(layer.num_hidden_activations(input_shape.clone()));
    let mut z = Array::zeros(output_shape.clone());
    layer.apply(params.view(), x.view(), tmp.view_mut(), z.view_mut());

    let dz = Array::random(z.raw_dim(), Uniform::new(-0.1, 0.1));
    let mut dp = Array::zeros(n);
    let dx = layer.derivatives(
        params.view(),
        x.view(),
        tmp.view(),
        dz.view(),
        dp.view_mut(),
    );

    let h = 0.001;

    fn err(claimed: f32, measured: f32) -> f32 {
        let d = measured.abs().max(0.01);
        (claimed - measured).abs() / d
    }

    // Scratch for the perturbed runs, so the saved activations in `tmp`
    // aren't disturbed.
    let mut scratch = tmp.clone();
    let mut z_minus = Array::zeros(output_shape.clone());
    let mut z_plus = Array::zeros(output_shape.clone());
    for i in 0..n {
        let saved = params[i];
        params[i] = saved - h;
        layer.apply(params.view(), x.view(), scratch.view_mut(), z_minus.view_mut());
        params[i] = saved + h;
        layer.apply(params.view(), x.view(), scratch.view_mut(), z_plus.view_mut());
        params[i] = saved;

        let claimed = dp[i];
        let measured = ((&z_plus - &z_minus) * (1.0 / (2.0 * h)) * &dz).sum();

        let error = err(claimed, measured);
        assert!(
            error <= error_limit,
            "{layer:?}: parameter {i} computed derivative = {claimed}, measured = {measured}, error = {error}, limit = {error_limit}"
        );
    }

    for i in ndarray::indices(input_shape) {
        let i = i.into_dimension();
        let saved = x[i.clone()];
        x[i.clone()] = saved - h;
        layer.apply(params.view(), x.view(), scratch.view_mut(), z_minus.view_mut());
        x[i.clone()] = saved + h;
        layer.apply(params.view(), x.view(), scratch.view_mut(), z_plus.view_mut());
        x[i.clone()] = saved;

        let claimed = dx[i.clone()];
        let measured = ((&z_plus - &z_minus) * (1.0 / (2.0 * h)) * &dz).sum();

        let error = err(claimed, measured);
        assert!(
            error <= error_limit,
            "{layer:?}: input element {i:?} computed derivative = {claimed}, measured = {measured}, error = {error}, limit = {error_limit}"
        );
    }
}

#[test]
fn test_dense_consistency() {
    test_layer(DenseLayer::new(1, 1), (1, 1), 0.02);
    test_layer(DenseLayer::new(5, 3), (2, 5), 0.02);
    test_layer(DenseLayer::new(4, 1).exponential(), (3, 4), 0.02);
    test_layer(DenseLayer::new(3, 3).dense(3, 2).exponential(), (2, 3), 0.02);
}

#[test]
fn test_recurrent_consistency() {
    test_layer(ShiftLayer::new(), (2, 3, 2), 0.02);
    test_layer(LstmLayer::new(2, 3), (1, 1, 2), 0.03);
    test_layer(LstmLayer::new(3, 2), (2, 4, 3), 0.03);
    test_layer(ShiftLayer::new().then(LstmLayer::new(2, 2)), (2, 3, 2), 0.03);
}

#[test]
fn test_shift_delays_one_step() {
    let layer = ShiftLayer::new();
    let x: Array3<f32> = array![[[1.0], [2.0], [3.0]]];
    let mut y = Array3::zeros(x.raw_dim());
    layer.apply(
        ArrayView::from_shape(0, &[]).unwrap(),
        x.view(),
        ArrayViewMut::from_shape(0, &mut []).unwrap(),
        y.view_mut(),
    );
    assert_eq!(y, array![[[0.0], [1.0], [2.0]]]);
}

#[test]
fn test_lstm_is_causal() {
    // Changing the last input step must not change earlier outputs.
    let layer = LstmLayer::new(2, 3);
    let params = Array::random(layer.num_params(), Uniform::new(-0.5, 0.5));
    let mut x = Array::random((1, 4, 2), Uniform::new(-1.0, 1.0));
    let mut tmp = Array1::zeros(layer.num_hidden_activations(x.raw_dim()));
    let mut y1 = Array3::zeros((1, 4, 3));
    layer.apply(params.view(), x.view(), tmp.view_mut(), y1.view_mut());
    x[[0, 3, 0]] += 1.0;
    x[[0, 3, 1]] -= 1.0;
    let mut y2 = Array3::zeros((1, 4, 3));
    layer.apply(params.view(), x.view(), tmp.view_mut(), y2.view_mut());
    assert_eq!(y1.slice(s![.., ..3, ..]), y2.slice(s![.., ..3, ..]));
    assert_ne!(y1.slice(s![.., 3, ..]), y2.slice(s![.., 3, ..]));
}

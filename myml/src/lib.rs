use ndarray::prelude::*;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;

mod traits;
pub use traits::{ActivationFn, Layer, Optimizer};

pub mod layers;
pub mod optim;

/// Random starting parameters: `scale * N(0, 1)` for each of `n` entries.
///
/// Taking the generator as an argument lets callers reproduce a run from a
/// seed.
pub fn random_params<R: Rng + ?Sized>(n: usize, scale: f32, rng: &mut R) -> Array1<f32> {
    scale * Array::random_using((n,), StandardNormal, rng)
}

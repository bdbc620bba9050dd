//! Layers. Each one knows how to run itself forward (`apply`) and how to
//! push derivatives backward (`derivatives`), given a slice of the model's
//! flat parameter vector.

mod activation;
mod dense;
mod embedding;
mod lstm;
mod sequence;
mod shift;

pub use activation::{ActivationLayer, Exponential, Sigmoid, Tanh};
pub use dense::DenseLayer;
pub use embedding::Embedding;
pub use lstm::LstmLayer;
pub use sequence::Sequence;
pub use shift::ShiftLayer;

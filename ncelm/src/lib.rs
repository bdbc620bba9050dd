//! A recurrent language model trained with noise-contrastive estimation.
//!
//! Instead of normalizing over the whole vocabulary at every step, the model
//! learns to tell true next tokens from tokens drawn from a unigram noise
//! distribution, and learns a per-position normalizer alongside. Validation
//! still computes the exact softmax, so perplexity is real and the learned
//! normalizer can be checked against the true partition function.

pub mod checkpoint;
pub mod config;
pub mod corpus;
pub mod loss;
pub mod model;
pub mod runlog;
pub mod sampler;
pub mod scorer;
pub mod train;
pub mod validate;

pub use config::{OptimizerConfig, TrainConfig};
pub use model::{ModelDims, NceModel};
pub use sampler::{NegativeSampler, TableSampler, UnigramTable};
pub use train::{StopReason, TrainOutcome, Trainer};

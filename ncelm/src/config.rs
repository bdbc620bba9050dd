use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Result};

/// Longest sentence the trainer will batch. Longer ones are dropped.
pub const MAX_SENTENCE_LEN: usize = 64;

/// Which optimizer to train with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerConfig {
    pub learning_rate: f32,
    /// Anneal the learning rate toward `lr_min`.
    pub decay: bool,
    pub lr_min: f32,
    /// Decay rate used when `decay` is on.
    pub gamma: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            learning_rate: 0.01,
            decay: false,
            lr_min: 0.005,
            gamma: 0.001,
        }
    }
}

/// Everything the trainer needs to know, independent of how it was parsed.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub vocab_size: usize,
    pub embed_dims: usize,
    pub context_dims: usize,
    /// Number of negative samples drawn per token.
    pub nb_negative: usize,
    /// Negative sampling order. Only 0 (independent per-token draws) is
    /// supported.
    pub sampling_order: usize,
    pub optimizer: OptimizerConfig,

    /// Stop after training on this many words.
    pub train_nb_words: u64,
    /// Size of the held-out set evaluated once training finishes.
    pub val_nb_words: u64,
    /// Size of the set evaluated periodically during training.
    pub train_val_nb_words: u64,
    pub validation_interval: Duration,

    /// Sentences per emitted batch (per length bucket).
    pub batch_size: usize,
    /// Sentences per call to the train/test step.
    pub sub_batch_size: usize,
    pub max_sentence_len: usize,

    pub seed: u64,
    /// Show a live progress bar while training.
    pub progress: bool,
    pub log_file: Option<PathBuf>,
    pub save_path: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            vocab_size: 10_000,
            embed_dims: 128,
            context_dims: 128,
            nb_negative: 50,
            sampling_order: 0,
            optimizer: OptimizerConfig::default(),
            train_nb_words: 100_000_000,
            val_nb_words: 5_000_000,
            train_val_nb_words: 100_000,
            validation_interval: Duration::from_secs(1200),
            batch_size: 256,
            sub_batch_size: 256,
            max_sentence_len: MAX_SENTENCE_LEN,
            seed: 0,
            progress: false,
            log_file: None,
            save_path: None,
        }
    }
}

impl TrainConfig {
    /// Reject settings the model can't be built with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.vocab_size > 0, "vocabulary size must be positive");
        ensure!(
            self.embed_dims > 0 && self.context_dims > 0,
            "embedding and context dimensions must be positive"
        );
        ensure!(self.nb_negative > 0, "need at least one negative sample");
        ensure!(
            self.batch_size > 0 && self.sub_batch_size > 0,
            "batch sizes must be positive"
        );
        ensure!(self.max_sentence_len > 0, "maximum sentence length must be positive");
        let opt = &self.optimizer;
        ensure!(
            opt.learning_rate.is_finite() && opt.learning_rate > 0.0,
            "learning rate must be a positive number, got {}",
            opt.learning_rate
        );
        if opt.decay {
            ensure!(
                opt.gamma.is_finite() && opt.gamma >= 0.0 && opt.lr_min.is_finite() && opt.lr_min >= 0.0,
                "learning-rate decay settings must be non-negative numbers"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TrainConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_empty_vocabulary() {
        let config = TrainConfig {
            vocab_size: 0,
            ..TrainConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_negatives() {
        let config = TrainConfig {
            nb_negative: 0,
            ..TrainConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

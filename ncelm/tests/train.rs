//! End-to-end tests: a tiny model trained on tiny synthetic corpora.

use std::time::Duration;

use anyhow::Result;
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use ncelm::checkpoint::Checkpoint;
use ncelm::train::Phase;
use ncelm::{
    ModelDims, NceModel, NegativeSampler, OptimizerConfig, StopReason, TableSampler, TrainConfig, Trainer,
    UnigramTable,
};

/// Sentences of length 3 to 5 over ids 0..12. With a vocabulary of 8, ids 8
/// and up are out of vocabulary.
fn corpus(nb_sentences: usize) -> Vec<Result<Vec<usize>>> {
    (0..nb_sentences)
        .map(|i| {
            let len = 3 + i % 3;
            Ok((0..len).map(|t| (i + 2 * t) % 12).collect())
        })
        .collect()
}

fn small_config() -> TrainConfig {
    TrainConfig {
        vocab_size: 8,
        embed_dims: 4,
        context_dims: 5,
        nb_negative: 3,
        train_nb_words: 300,
        val_nb_words: 40,
        train_val_nb_words: 20,
        validation_interval: Duration::from_secs(3600),
        batch_size: 4,
        sub_batch_size: 2,
        max_sentence_len: 5,
        seed: 3,
        ..TrainConfig::default()
    }
}

#[test]
fn overfits_a_fixed_batch() {
    let vocab_size = 10;
    let table = UnigramTable::uniform(vocab_size).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let dims = ModelDims {
        vocab_size,
        embed_dims: 4,
        context_dims: 4,
    };
    let mut model = NceModel::new(dims, 1, table.clone(), &OptimizerConfig::default(), &mut rng).unwrap();
    let mut sampler = NegativeSampler::new(TableSampler::new(&table, rng).unwrap(), 1, 0).unwrap();

    let batch = array![[1usize, 2, 3], [4, 5, 6]];
    let augmented = sampler.negative_sample(batch.view());

    let first = model.train(augmented.view());
    assert!(first.is_finite() && first > 0.0, "first loss {first}");
    let mut last = first;
    for _ in 0..49 {
        last = model.train(augmented.view());
    }
    let after = model.loss(augmented.view());
    assert!(last.is_finite());
    assert!(after < first, "loss went from {first} to {after}");
}

#[test]
fn trains_until_the_word_budget() {
    let dir = tempfile::tempdir().unwrap();
    let save_path = dir.path().join("model.bin");
    let log_path = dir.path().join("run.log");
    let config = TrainConfig {
        save_path: Some(save_path.clone()),
        log_file: Some(log_path.clone()),
        ..small_config()
    };
    let table = UnigramTable::uniform(config.vocab_size).unwrap();
    let mut trainer = Trainer::new(config.clone(), table.clone()).unwrap();
    assert_eq!(trainer.phase(), Phase::Init);

    let outcome = trainer.run(corpus(1000)).unwrap();
    assert_eq!(outcome.stop, StopReason::BudgetReached);
    assert!(outcome.words_trained >= config.train_nb_words);
    // One batch is at most 4 sentences of 5 words.
    assert!(outcome.words_trained < config.train_nb_words + 20);
    assert!(outcome.steps > 0);
    assert!(outcome.last_loss.unwrap().is_finite());
    assert_eq!(trainer.phase(), Phase::Done);

    let report = outcome.final_report.unwrap();
    assert!(report.nb_words >= config.val_nb_words as f64);
    assert!(report.loss.is_finite());
    assert!(report.perplexity >= 1.0);
    assert!(report.partition_var >= 0.0 && report.z_var >= 0.0);

    // The saved parameters load into a freshly initialized model.
    let dims = trainer.model().dims();
    let mut fresh = NceModel::new(
        dims,
        config.nb_negative,
        table,
        &config.optimizer,
        &mut StdRng::seed_from_u64(99),
    )
    .unwrap();
    assert_ne!(fresh.params(), trainer.model().params());
    fresh.load_params(&save_path).unwrap();
    assert_eq!(fresh.params(), trainer.model().params());
    assert_eq!(Checkpoint::load(&save_path).unwrap().tensors.len(), 8);

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("NceLangModel:Setup"));
    assert!(log.contains("NceLangModel:Train - time:"));
    let train_lines: Vec<&str> = log.lines().filter(|l| l.contains("NceLangModel:Train")).collect();
    assert_eq!(train_lines.len() as u64, outcome.steps);
    assert!(train_lines
        .iter()
        .all(|l| l.contains("sentences/s:") && l.contains("words/s:") && l.contains("eta:")));
    // One validation before training, one after.
    assert_eq!(log.matches("NceLangModel:Val").count(), 2);
}

#[test]
fn validates_whenever_the_interval_elapses() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("run.log");
    let config = TrainConfig {
        validation_interval: Duration::ZERO,
        log_file: Some(log_path.clone()),
        ..small_config()
    };
    let mut trainer = Trainer::new(config, UnigramTable::uniform(8).unwrap()).unwrap();
    let outcome = trainer.run(corpus(1000)).unwrap();
    assert_eq!(outcome.stop, StopReason::BudgetReached);
    assert!(outcome.steps > 0);
    assert_eq!(trainer.phase(), Phase::Done);

    // Before training, after every step, and on the held-out set at the end.
    let log = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(log.matches("NceLangModel:Val").count() as u64, outcome.steps + 2);
}

#[test]
fn exhausted_corpus_still_validates_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    let save_path = dir.path().join("model.bin");
    let config = TrainConfig {
        train_nb_words: 1_000_000,
        save_path: Some(save_path.clone()),
        ..small_config()
    };
    let mut trainer = Trainer::new(config, UnigramTable::uniform(8).unwrap()).unwrap();
    let outcome = trainer.run(corpus(60)).unwrap();
    assert_eq!(outcome.stop, StopReason::StreamExhausted);
    assert!(outcome.steps > 0);
    assert!(outcome.final_report.is_some());
    assert!(save_path.exists());
}

#[test]
fn corpus_smaller_than_the_validation_set() {
    let mut trainer = Trainer::new(small_config(), UnigramTable::uniform(8).unwrap()).unwrap();
    let outcome = trainer.run(corpus(3)).unwrap();
    assert_eq!(outcome.stop, StopReason::StreamExhausted);
    assert_eq!(outcome.steps, 0);
    assert_eq!(outcome.words_trained, 0);
    // Everything went to the final validation set.
    assert_eq!(outcome.final_report.unwrap().nb_words, 12.0);
}

#[test]
fn runs_are_reproducible() {
    let run = || {
        let table = UnigramTable::from_counts(&[5, 4, 3, 2, 2, 1, 1, 6]).unwrap();
        let mut trainer = Trainer::new(small_config(), table).unwrap();
        let outcome = trainer.run(corpus(500)).unwrap();
        (trainer.model().params().to_owned(), outcome.last_loss)
    };
    assert_eq!(run(), run());
}

#[test]
fn corpus_errors_are_reported() {
    let mut trainer = Trainer::new(small_config(), UnigramTable::uniform(8).unwrap()).unwrap();
    let mut sentences = corpus(100);
    sentences[50] = Err(anyhow::anyhow!("corpus.txt:51: bad token id \"x\""));
    let err = trainer.run(sentences).unwrap_err();
    assert!(format!("{err:#}").contains("bad token id"));
}

#[test]
fn rejects_bad_setups() {
    let higher_order = TrainConfig {
        sampling_order: 2,
        ..small_config()
    };
    assert!(Trainer::new(higher_order, UnigramTable::uniform(8).unwrap()).is_err());
    assert!(Trainer::new(small_config(), UnigramTable::uniform(9).unwrap()).is_err());
}

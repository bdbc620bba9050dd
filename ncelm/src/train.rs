//! The training loop.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{ensure, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::TrainConfig;
use crate::corpus::{LengthBuckets, SentenceStream};
use crate::loss::ValidationReport;
use crate::model::{ModelDims, NceModel};
use crate::runlog::RunLog;
use crate::sampler::{NegativeSampler, TableSampler, UnigramTable};
use crate::validate::{log_report, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Validating,
    Training,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Trained on `train_nb_words` words.
    BudgetReached,
    /// The corpus ran out first.
    StreamExhausted,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub stop: StopReason,
    pub steps: u64,
    pub sentences_trained: u64,
    pub words_trained: u64,
    /// Training loss of the last batch, if there was one.
    pub last_loss: Option<f32>,
    /// Result of the final validation, or `None` if the validation set was
    /// empty.
    pub final_report: Option<ValidationReport>,
}

/// Throughput so far and the estimated time left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speed {
    pub sentences_per_sec: f64,
    pub words_per_sec: f64,
    pub eta: Duration,
}

impl Speed {
    pub fn measure(sentences: u64, words: u64, budget_words: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64().max(1e-9);
        let words_per_sec = words as f64 / secs;
        let remaining = budget_words.saturating_sub(words) as f64;
        let eta = if words_per_sec > 0.0 {
            Duration::from_secs_f64(remaining / words_per_sec)
        } else {
            Duration::ZERO
        };
        Speed {
            sentences_per_sec: sentences as f64 / secs,
            words_per_sec,
            eta,
        }
    }
}

/// Formats a [`Duration`] as hours and minutes, rounding minutes up.
#[derive(Debug, Clone, Copy)]
pub struct Eta(pub Duration);

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs_f64();
        let hours = (secs / 3600.0).floor();
        let minutes = ((secs - hours * 3600.0) / 60.0).ceil();
        write!(f, "{}h{:02}m", hours as u64, minutes as u64)
    }
}

pub struct Trainer {
    config: TrainConfig,
    model: NceModel,
    sampler: NegativeSampler,
    validator: Validator,
    run_log: RunLog,
    phase: Phase,
}

impl Trainer {
    /// Build a model and noise sampler. Both draw from one generator seeded
    /// with `config.seed`, so a run is reproducible.
    pub fn new(config: TrainConfig, table: UnigramTable) -> Result<Self> {
        config.validate()?;
        ensure!(
            table.vocab_size() == config.vocab_size,
            "unigram table covers {} items but the vocabulary has {}",
            table.vocab_size(),
            config.vocab_size
        );

        let mut rng = StdRng::seed_from_u64(config.seed);
        let dims = ModelDims {
            vocab_size: config.vocab_size,
            embed_dims: config.embed_dims,
            context_dims: config.context_dims,
        };
        let model = NceModel::new(dims, config.nb_negative, table.clone(), &config.optimizer, &mut rng)?;
        let sampler = NegativeSampler::new(
            TableSampler::new(&table, rng)?,
            config.nb_negative,
            config.sampling_order,
        )?;
        let run_log = RunLog::create(config.log_file.as_deref())?;

        Ok(Trainer {
            validator: Validator::new(config.sub_batch_size),
            config,
            model,
            sampler,
            run_log,
            phase: Phase::Init,
        })
    }

    pub fn model(&self) -> &NceModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut NceModel {
        &mut self.model
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn set_phase(&mut self, phase: Phase) {
        if phase != self.phase {
            log::debug!("{:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// One step on a batch of true sentences: augment it with noise, then
    /// train on it `sub_batch_size` sentences at a time. Returns the mean loss
    /// per word.
    pub fn train_batch(&mut self, batch: ArrayView2<'_, usize>) -> f32 {
        let augmented = self.sampler.negative_sample(batch);
        let mut total = 0.0f64;
        for chunk in augmented.axis_chunks_iter(Axis(1), self.config.sub_batch_size) {
            let words = chunk.len_of(Axis(1)) * chunk.len_of(Axis(2));
            total += self.model.train(chunk) as f64 * words as f64;
        }
        (total / batch.len().max(1) as f64) as f32
    }

    /// Evaluate the model on `batches` and log the result.
    pub fn validate(&mut self, batches: &[Array2<usize>]) -> Result<Option<ValidationReport>> {
        let resume = self.phase;
        self.set_phase(Phase::Validating);
        let report = self.validator.run(&self.model, &mut self.sampler, batches);
        match &report {
            Some(report) => log_report(report, &mut self.run_log)?,
            None => log::warn!("validation set is empty; skipping validation"),
        }
        self.set_phase(resume);
        Ok(report)
    }

    fn progress_bar(&self) -> Result<ProgressBar> {
        if !self.config.progress {
            return Ok(ProgressBar::hidden());
        }
        let bar = ProgressBar::new(self.config.train_nb_words);
        bar.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] [{bar:40}] {pos}/{len} words {msg}")?
                .progress_chars("=> "),
        );
        Ok(bar)
    }

    /// Train on `corpus` until `train_nb_words` words have been seen or the
    /// corpus runs out.
    ///
    /// The first `val_nb_words` words become the final validation set and the
    /// next `train_val_nb_words` words the set checked every
    /// `validation_interval` during training. Neither is trained on.
    pub fn run<I>(&mut self, corpus: I) -> Result<TrainOutcome>
    where
        I: IntoIterator<Item = Result<Vec<usize>>>,
    {
        self.set_phase(Phase::Init);
        let c = &self.config;
        let setup = format!(
            "vocab_size: {} - embed_dims: {} - context_dims: {} - nb_negative: {} - learning_rate: {} - decay: {} - batch_size: {} - train_nb_words: {}",
            c.vocab_size,
            c.embed_dims,
            c.context_dims,
            c.nb_negative,
            c.optimizer.learning_rate,
            c.optimizer.decay,
            c.batch_size,
            c.train_nb_words,
        );
        log::info!("NceLangModel: {setup}");
        self.run_log.info(format_args!("NceLangModel:Setup - {setup}"))?;

        let max_len = self.config.max_sentence_len;
        let batch_size = self.config.batch_size;
        let mut stream = SentenceStream::new(corpus.into_iter(), self.config.vocab_size);
        let val_batches = stream.take_words(self.config.val_nb_words, max_len, batch_size)?;
        let train_val_batches = stream.take_words(self.config.train_val_nb_words, max_len, batch_size)?;
        log::info!(
            "held out {} sentences ({} words) for validation",
            stream.sentences_read(),
            stream.words_read()
        );

        self.validate(&train_val_batches)?;

        self.set_phase(Phase::Training);
        let progress = self.progress_bar()?;
        let mut buckets = LengthBuckets::new(max_len, batch_size);
        let start = Instant::now();
        let mut next_validation = start + self.config.validation_interval;
        let mut steps = 0u64;
        let mut sentences_trained = 0u64;
        let mut words_trained = 0u64;
        let mut last_loss = None;
        let mut stop = StopReason::StreamExhausted;

        while let Some(sentence) = stream.next_sentence()? {
            let Some(batch) = buckets.push(&sentence) else {
                continue;
            };
            let loss = self.train_batch(batch.view());
            steps += 1;
            sentences_trained += batch.nrows() as u64;
            words_trained += batch.len() as u64;
            last_loss = Some(loss);

            let speed = Speed::measure(
                sentences_trained,
                words_trained,
                self.config.train_nb_words,
                start.elapsed(),
            );
            progress.set_position(words_trained);
            progress.set_message(format!("loss: {loss:.4} - eta: {}", Eta(speed.eta)));
            progress.suspend(|| {
                log::info!(
                    "NceLangModel:Train step {steps} - {:.1} sentences/s - {:.1} words/s - loss: {loss:.4} - lr: {} - eta: {}",
                    speed.sentences_per_sec,
                    speed.words_per_sec,
                    self.model.learning_rate(),
                    Eta(speed.eta),
                )
            });
            self.run_log.info(format_args!(
                "NceLangModel:Train - time: {:.3} - loss: {loss:.6} - sentences/s: {:.1} - words/s: {:.1} - eta: {}",
                start.elapsed().as_secs_f64(),
                speed.sentences_per_sec,
                speed.words_per_sec,
                Eta(speed.eta),
            ))?;

            if Instant::now() >= next_validation {
                progress.suspend(|| self.validate(&train_val_batches))?;
                next_validation = Instant::now() + self.config.validation_interval;
            }
            if words_trained >= self.config.train_nb_words {
                stop = StopReason::BudgetReached;
                break;
            }
        }
        progress.finish_and_clear();

        match stop {
            StopReason::BudgetReached => log::info!("trained on {words_trained} words in {steps} steps"),
            StopReason::StreamExhausted => log::warn!(
                "corpus ran out after {words_trained} training words ({} requested)",
                self.config.train_nb_words
            ),
        }

        log::info!("training finished; evaluating on the validation set");
        let final_report = self.validate(&val_batches)?;
        if let Some(path) = &self.config.save_path {
            self.model.save_params(path)?;
        }
        self.set_phase(Phase::Done);

        Ok(TrainOutcome {
            stop,
            steps,
            sentences_trained,
            words_trained,
            last_loss,
            final_report,
        })
    }
}

impl fmt::Debug for Trainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trainer")
            .field("phase", &self.phase)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

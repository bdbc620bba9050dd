use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use ncelm::corpus::read_corpus;
use ncelm::sampler::count_unigrams;
use ncelm::{OptimizerConfig, StopReason, TrainConfig, Trainer, UnigramTable};

#[derive(Parser)]
#[command(about = "Train a recurrent language model with noise-contrastive estimation", long_about = None)]
struct Options {
    /// Training corpus: one sentence per line, whitespace-separated token ids
    #[arg(long = "train", value_name = "FILE")]
    train_file: PathBuf,

    /// Cache the unigram noise distribution in FILE, computing it from the
    /// corpus if FILE doesn't exist; without this, noise is uniform
    #[arg(long = "unigram", value_name = "FILE")]
    unigram_file: Option<PathBuf>,

    /// Learning rate
    #[arg(short = 'a', long = "lr", default_value_t = 0.01)]
    learning_rate: f32,

    /// Stop after training on N words
    #[arg(short = 'R', long = "running-words", value_name = "N", default_value_t = 100_000_000)]
    train_nb_words: u64,

    /// Vocabulary size; id N-1 stands for all unknown words
    #[arg(short = 'V', long = "vocab-size", value_name = "N", default_value_t = 10_000)]
    vocab_size: usize,

    /// Number of words held out and checked periodically during training
    #[arg(short = 'm', long = "val-run", value_name = "N", default_value_t = 100_000)]
    train_val_nb_words: u64,

    /// Number of words held out for the final evaluation
    #[arg(short = 'n', long = "nb-evaluation", value_name = "N", default_value_t = 5_000_000)]
    val_nb_words: u64,

    /// Learning-rate decay rate
    #[arg(short = 'g', long = "gamma", default_value_t = 0.001)]
    gamma: f32,

    /// Learning-rate floor when decaying
    #[arg(short = 'b', long = "lr-min", default_value_t = 0.005)]
    lr_min: f32,

    /// Decay the learning rate over time
    #[arg(short = 'd', long = "decay")]
    decay: bool,

    /// Number of negative samples per word
    #[arg(short = 'N', long = "nb-negative", default_value_t = 50)]
    nb_negative: usize,

    /// Size of the recurrent context vector
    #[arg(short = 'C', long = "context-size", default_value_t = 128)]
    context_dims: usize,

    /// Size of the word embeddings
    #[arg(short = 'E', long = "embedding-size", default_value_t = 128)]
    embed_dims: usize,

    /// Write a timestamped log of the run to FILE
    #[arg(short = 'l', long = "log-file", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Run validation every N seconds during training; fractions are allowed
    #[arg(short = 'r', long = "report-interval", value_name = "N", default_value_t = 1200.0)]
    report_interval: f64,

    /// Save the trained parameters to FILE
    #[arg(short = 's', long = "save", value_name = "FILE")]
    save_path: Option<PathBuf>,

    /// Sentences per batch
    #[arg(long = "batch-size", default_value_t = 256)]
    batch_size: usize,

    /// Random seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Show a progress bar
    #[arg(long)]
    progress: bool,
}

impl Options {
    fn config(&self) -> Result<TrainConfig> {
        let validation_interval = Duration::try_from_secs_f64(self.report_interval)
            .with_context(|| format!("invalid report interval {}", self.report_interval))?;
        Ok(TrainConfig {
            vocab_size: self.vocab_size,
            embed_dims: self.embed_dims,
            context_dims: self.context_dims,
            nb_negative: self.nb_negative,
            optimizer: OptimizerConfig {
                learning_rate: self.learning_rate,
                decay: self.decay,
                lr_min: self.lr_min,
                gamma: self.gamma,
            },
            train_nb_words: self.train_nb_words,
            val_nb_words: self.val_nb_words,
            train_val_nb_words: self.train_val_nb_words,
            validation_interval,
            batch_size: self.batch_size,
            sub_batch_size: self.batch_size,
            seed: self.seed,
            progress: self.progress,
            log_file: self.log_file.clone(),
            save_path: self.save_path.clone(),
            ..TrainConfig::default()
        })
    }
}

fn unigram_table(options: &Options) -> Result<UnigramTable> {
    let vocab_size = options.vocab_size;
    match &options.unigram_file {
        None => {
            log::info!("no unigram table given; using uniform noise");
            UnigramTable::uniform(vocab_size)
        }
        Some(path) => UnigramTable::load_or_build(path, vocab_size, || {
            log::info!("counting unigrams in {:?}", options.train_file);
            let counts = count_unigrams(read_corpus(&options.train_file)?, vocab_size)?;
            UnigramTable::from_counts(&counts)
        }),
    }
}

fn run(options: Options) -> Result<()> {
    let config = options.config()?;
    config.validate()?;
    let table = unigram_table(&options)?;
    let mut trainer = Trainer::new(config, table)?;
    let outcome = trainer.run(read_corpus(&options.train_file)?)?;
    if outcome.stop == StopReason::StreamExhausted {
        log::warn!("the corpus has fewer words than --running-words");
    }
    if let Some(report) = &outcome.final_report {
        println!(
            "trained on {} words; validation loss {:.4}, perplexity {:.2}",
            outcome.words_trained, report.loss, report.perplexity
        );
    }
    Ok(())
}

fn main() {
    if let Err(err) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
    {
        eprintln!("failed to initialize logging: {err}");
    }

    let options = Options::parse();
    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        Options::try_parse_from(["ncelm", "--train", "corpus.txt"].iter().chain(args).copied()).unwrap()
    }

    #[test]
    fn report_interval_accepts_fractions() {
        let config = parse(&["-r", "0.5"]).config().unwrap();
        assert_eq!(config.validation_interval, Duration::from_millis(500));
        let config = parse(&[]).config().unwrap();
        assert_eq!(config.validation_interval, Duration::from_secs(1200));
    }

    #[test]
    fn report_interval_must_be_a_duration() {
        assert!(parse(&["--report-interval=-1"]).config().is_err());
        assert!(parse(&["-r", "inf"]).config().is_err());
        assert!(Options::try_parse_from(["ncelm", "--train", "corpus.txt", "-r", "soon"]).is_err());
    }
}

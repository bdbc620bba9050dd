//! Count token frequencies in a corpus and save the unigram table the
//! trainer uses as its noise distribution.

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;

use ncelm::corpus::read_corpus;
use ncelm::sampler::count_unigrams;
use ncelm::UnigramTable;

#[derive(Parser)]
#[command(about = "Build a unigram noise table from a corpus", long_about = None)]
struct Options {
    /// Corpus: one sentence per line, whitespace-separated token ids
    #[arg(value_name = "CORPUS")]
    corpus: PathBuf,

    /// Where to write the table
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Vocabulary size; ids of N-1 and up are counted together
    #[arg(short = 'V', long = "vocab-size", value_name = "N", default_value_t = 10_000)]
    vocab_size: usize,
}

fn run(options: &Options) -> Result<()> {
    let counts = count_unigrams(read_corpus(&options.corpus)?, options.vocab_size)?;
    let total: u64 = counts.iter().sum();
    let unseen = counts.iter().filter(|&&c| c == 0).count();
    let table = UnigramTable::from_counts(&counts)?;
    table.save(&options.output)?;
    log::info!(
        "counted {total} tokens; {unseen} of {} ids never occur; wrote {:?}",
        options.vocab_size,
        options.output
    );
    Ok(())
}

fn main() {
    if let Err(err) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
    {
        eprintln!("failed to initialize logging: {err}");
    }

    let options = Options::parse();
    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

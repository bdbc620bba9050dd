//! Reading sentences and grouping them into batches.
//!
//! A corpus file holds one sentence per line, each a whitespace-separated
//! list of integer token ids. Id `vocab_size - 1` stands for every
//! out-of-vocabulary token.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::mem;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::prelude::*;

/// Parse one line of a corpus file.
pub fn parse_sentence(line: &str) -> Result<Vec<usize>> {
    line.split_whitespace()
        .map(|word| {
            word.parse::<usize>()
                .with_context(|| format!("bad token id {word:?}"))
        })
        .collect()
}

/// Open a corpus file and iterate over its sentences, lazily.
pub fn read_corpus(path: &Path) -> Result<impl Iterator<Item = Result<Vec<usize>>>> {
    let f = File::open(path).with_context(|| format!("failed to open corpus {path:?}"))?;
    let path = path.to_owned();
    Ok(BufReader::new(f).lines().enumerate().map(move |(i, line)| {
        let line = line.with_context(|| format!("failed to read {path:?}"))?;
        parse_sentence(&line).with_context(|| format!("{}:{}", path.display(), i + 1))
    }))
}

/// Map every id past the end of the vocabulary to the last id.
pub fn clamp_ids(sentence: &mut [usize], vocab_size: usize) {
    let max_id = vocab_size - 1;
    for id in sentence {
        *id = (*id).min(max_id);
    }
}

/// Forward-only cursor over a corpus. Every sentence it hands out has been
/// clamped to the vocabulary.
///
/// The validation sets are cut from the front of the stream with
/// [`take_words`](Self::take_words), so training never sees them.
pub struct SentenceStream<I> {
    inner: I,
    vocab_size: usize,
    sentences_read: u64,
    words_read: u64,
}

impl<I> SentenceStream<I>
where
    I: Iterator<Item = Result<Vec<usize>>>,
{
    pub fn new(inner: I, vocab_size: usize) -> Self {
        assert!(vocab_size > 0, "vocabulary can't be empty");
        SentenceStream {
            inner,
            vocab_size,
            sentences_read: 0,
            words_read: 0,
        }
    }

    pub fn sentences_read(&self) -> u64 {
        self.sentences_read
    }

    pub fn words_read(&self) -> u64 {
        self.words_read
    }

    /// The next sentence, or `None` at end of stream.
    pub fn next_sentence(&mut self) -> Result<Option<Vec<usize>>> {
        let Some(sentence) = self.inner.next() else {
            return Ok(None);
        };
        let mut sentence = sentence?;
        clamp_ids(&mut sentence, self.vocab_size);
        self.sentences_read += 1;
        self.words_read += sentence.len() as u64;
        Ok(Some(sentence))
    }

    /// Consume sentences until at least `nb_words` usable words have been
    /// read, and return them as batches of at most `batch_size` equal-length
    /// sentences, shortest first.
    ///
    /// Empty sentences and sentences longer than `max_len` are skipped and
    /// don't count. Returns fewer words if the stream runs out first.
    pub fn take_words(&mut self, nb_words: u64, max_len: usize, batch_size: usize) -> Result<Vec<Array2<usize>>> {
        assert!(batch_size > 0);
        let mut by_len: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut taken = 0;
        while taken < nb_words {
            let Some(sentence) = self.next_sentence()? else {
                break;
            };
            if sentence.is_empty() || sentence.len() > max_len {
                continue;
            }
            taken += sentence.len() as u64;
            by_len.entry(sentence.len()).or_default().extend(sentence);
        }

        let mut batches = vec![];
        for (len, ids) in by_len {
            for chunk in ids.chunks(batch_size * len) {
                let batch = Array2::from_shape_vec((chunk.len() / len, len), chunk.to_vec())
                    .expect("each chunk holds whole sentences");
                batches.push(batch);
            }
        }
        Ok(batches)
    }
}

/// Groups sentences by length so each emitted batch is a dense
/// `(batch_size, len)` array with no padding.
#[derive(Debug)]
pub struct LengthBuckets {
    batch_size: usize,
    /// `buckets[len - 1]` holds the ids of pending sentences of length `len`,
    /// concatenated.
    buckets: Vec<Vec<usize>>,
}

impl LengthBuckets {
    pub fn new(max_len: usize, batch_size: usize) -> Self {
        assert!(batch_size > 0);
        LengthBuckets {
            batch_size,
            buckets: vec![vec![]; max_len],
        }
    }

    pub fn max_len(&self) -> usize {
        self.buckets.len()
    }

    /// Add a sentence. If that fills its bucket, empty the bucket and return
    /// its contents as one batch.
    ///
    /// Empty sentences and sentences longer than `max_len` are dropped.
    pub fn push(&mut self, sentence: &[usize]) -> Option<Array2<usize>> {
        let len = sentence.len();
        if len == 0 || len > self.max_len() {
            return None;
        }
        let bucket = &mut self.buckets[len - 1];
        bucket.extend_from_slice(sentence);
        if bucket.len() < self.batch_size * len {
            return None;
        }
        let ids = mem::take(bucket);
        Some(Array2::from_shape_vec((self.batch_size, len), ids).expect("bucket holds exactly one batch"))
    }

    /// Number of sentences waiting in partly filled buckets.
    pub fn pending(&self) -> usize {
        self.buckets
            .iter()
            .enumerate()
            .map(|(i, b)| b.len() / (i + 1))
            .sum()
    }
}

//! Unigram noise distribution and negative sampling.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use ndarray::prelude::*;
use ndarray::{ShapeBuilder, Slice};
use ndarray_rand::rand_distr::WeightedAliasIndex;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Marginal probability of each vocabulary item. Immutable once built; sums
/// to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct UnigramTable {
    probs: Array1<f32>,
}

/// On-disk form of a [`UnigramTable`].
#[derive(Serialize, Deserialize)]
struct CachedTable {
    vocab_size: usize,
    probs: Vec<f32>,
}

impl UnigramTable {
    /// Build a table from per-item probabilities, rescaling them to sum to 1.
    ///
    /// Fails if the vector has the wrong length, contains negative or
    /// non-finite entries, or has no mass at all.
    pub fn new(probs: Vec<f32>, vocab_size: usize) -> Result<Self> {
        ensure!(vocab_size > 0, "vocabulary size must be positive");
        ensure!(
            probs.len() == vocab_size,
            "unigram table has {} entries, expected one per vocabulary item ({vocab_size})",
            probs.len()
        );
        if let Some((i, p)) = probs
            .iter()
            .enumerate()
            .find(|&(_, &p)| !p.is_finite() || p < 0.0)
        {
            bail!("unigram table entry {i} is {p}; probabilities must be finite and non-negative");
        }
        let total: f64 = probs.iter().map(|&p| p as f64).sum();
        ensure!(total > 0.0, "unigram table has zero total probability");

        let probs = probs.into_iter().map(|p| (p as f64 / total) as f32).collect();
        Ok(UnigramTable { probs })
    }

    /// Every item equally likely.
    pub fn uniform(vocab_size: usize) -> Result<Self> {
        Self::new(vec![1.0; vocab_size], vocab_size)
    }

    /// Relative frequencies from raw token counts.
    pub fn from_counts(counts: &[u64]) -> Result<Self> {
        Self::new(counts.iter().map(|&c| c as f32).collect(), counts.len())
    }

    pub fn vocab_size(&self) -> usize {
        self.probs.len()
    }

    pub fn probs(&self) -> ArrayView1<'_, f32> {
        self.probs.view()
    }

    pub fn prob(&self, id: usize) -> f32 {
        self.probs[id]
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let f = BufWriter::new(
            File::create(path)
                .with_context(|| format!("failed to create unigram table file {path:?}"))?,
        );
        let cached = CachedTable {
            vocab_size: self.vocab_size(),
            probs: self.probs.to_vec(),
        };
        bincode::serialize_into(f, &cached)
            .with_context(|| format!("failed to write unigram table to {path:?}"))
    }

    /// Load a cached table, checking that it was built for `vocab_size`.
    pub fn load(path: &Path, vocab_size: usize) -> Result<Self> {
        let f = BufReader::new(
            File::open(path)
                .with_context(|| format!("failed to open unigram table file {path:?}"))?,
        );
        let cached: CachedTable = bincode::deserialize_from(f)
            .with_context(|| format!("failed to load unigram table from {path:?}"))?;
        ensure!(
            cached.vocab_size == vocab_size,
            "unigram table {path:?} was built for vocabulary size {}, not {vocab_size}",
            cached.vocab_size
        );
        Self::new(cached.probs, vocab_size).with_context(|| format!("bad unigram table {path:?}"))
    }

    /// Load the table cached at `path`, or call `build` and cache the result
    /// there.
    pub fn load_or_build<F>(path: &Path, vocab_size: usize, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Self>,
    {
        if path.exists() {
            log::info!("loading unigram table from {path:?}");
            return Self::load(path, vocab_size);
        }
        let table = build()?;
        ensure!(
            table.vocab_size() == vocab_size,
            "computed unigram table has {} entries, expected {vocab_size}",
            table.vocab_size()
        );
        table.save(path)?;
        log::info!("saved unigram table to {path:?}");
        Ok(table)
    }
}

/// Count how often each token occurs. Ids past the vocabulary are counted
/// in the last (out-of-vocabulary) slot.
pub fn count_unigrams<I>(sentences: I, vocab_size: usize) -> Result<Vec<u64>>
where
    I: IntoIterator<Item = Result<Vec<usize>>>,
{
    ensure!(vocab_size > 0, "vocabulary size must be positive");
    let max_id = vocab_size - 1;
    let mut counts = vec![0u64; vocab_size];
    for sentence in sentences {
        for id in sentence? {
            counts[id.min(max_id)] += 1;
        }
    }
    Ok(counts)
}

/// Draws i.i.d. vocabulary ids from a unigram table using Walker's alias
/// method, so each draw takes constant time.
pub struct TableSampler {
    dist: WeightedAliasIndex<f32>,
    vocab_size: usize,
    rng: StdRng,
}

impl TableSampler {
    pub fn new(table: &UnigramTable, rng: StdRng) -> Result<Self> {
        let dist =
            WeightedAliasIndex::new(table.probs.to_vec()).context("can't build alias table")?;
        Ok(TableSampler {
            dist,
            vocab_size: table.vocab_size(),
            rng,
        })
    }

    pub fn uniform(vocab_size: usize, rng: StdRng) -> Result<Self> {
        Self::new(&UnigramTable::uniform(vocab_size)?, rng)
    }

    /// An array of the given shape filled with independent draws.
    pub fn sample<Sh>(&mut self, shape: Sh) -> Array<usize, Sh::Dim>
    where
        Sh: ShapeBuilder,
    {
        Array::random_using(shape, &self.dist, &mut self.rng)
    }
}

impl fmt::Debug for TableSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSampler")
            .field("vocab_size", &self.vocab_size)
            .finish_non_exhaustive()
    }
}

/// Builds augmented batches: the true batch plus `nb_negative` noise batches
/// of the same shape, stacked along a new leading axis.
#[derive(Debug)]
pub struct NegativeSampler {
    sampler: TableSampler,
    nb_negative: usize,
}

impl NegativeSampler {
    /// Only `order == 0` (each position drawn independently of its context) is
    /// implemented.
    pub fn new(sampler: TableSampler, nb_negative: usize, order: usize) -> Result<Self> {
        if order != 0 {
            bail!("negative sampling of order {order} is not implemented; only order 0 is supported");
        }
        ensure!(nb_negative > 0, "need at least one negative sample");
        Ok(NegativeSampler {
            sampler,
            nb_negative,
        })
    }

    /// Returns an array of shape `(1 + nb_negative,) + batch.shape()`. Slot 0
    /// is a copy of `batch`; every other slot is fresh noise.
    pub fn negative_sample<D>(&mut self, batch: ArrayView<'_, usize, D>) -> Array<usize, D::Larger>
    where
        D: Dimension,
    {
        let mut shape = batch.view().insert_axis(Axis(0)).raw_dim();
        shape[0] = 1 + self.nb_negative;
        let mut out = Array::<usize, D::Larger>::zeros(shape);
        out.slice_axis_mut(Axis(0), Slice::from(0..1)).assign(&batch);

        let mut noise = out.slice_axis_mut(Axis(0), Slice::from(1..));
        let draws = self.sampler.sample(noise.raw_dim());
        noise.assign(&draws);
        out
    }
}

//! The NCE training objective and the evaluation metrics.
//!
//! Training never normalizes over the vocabulary. For every slot of an
//! augmented batch it asks: is this token more likely to have come from the
//! model or from the noise distribution? The probability the model gives to
//! "data" is `pos / (pos + neg)`, where `pos` is the model's unnormalized
//! score (already scaled by the learned normalizer) and `neg` is
//! `nb_negative` times the token's unigram probability.
//!
//! Evaluation additionally computes the exact softmax over the vocabulary,
//! which gives a true perplexity and tells us how far the learned normalizer
//! is from the real partition function.

use ndarray::prelude::*;
use ndarray::Zip;

use myml::layers::Sigmoid;
use myml::ActivationFn;

/// Added inside every logarithm so that a zero probability costs a large but
/// finite amount.
pub const EPSILON: f32 = 1.0e-37;

const EPSILON_F64: f64 = 1.0e-37;

#[derive(Debug, Clone, Copy)]
pub struct NceObjective {
    nb_negative: usize,
}

impl NceObjective {
    pub fn new(nb_negative: usize) -> Self {
        NceObjective { nb_negative }
    }

    /// `log(pos / neg)` for one slot.
    ///
    /// `pos / (pos + neg)` is `sigmoid` of this, which is how we evaluate it:
    /// the two forms are equal, but this one can't overflow.
    fn log_odds(&self, log_pos: f32, noise: f32) -> f32 {
        log_pos - (self.nb_negative as f32 * noise).ln()
    }

    /// Mean negative log-likelihood of the correct labels, per word of the
    /// true sentences.
    ///
    /// `log_pos` and `noise` have shape `(1 + nb_negative, N, T)`. Slot 0 holds
    /// the true sentences and should be classified as data; every other slot
    /// should be classified as noise.
    pub fn loss(&self, log_pos: ArrayView3<'_, f32>, noise: ArrayView3<'_, f32>) -> f32 {
        assert_eq!(log_pos.shape(), noise.shape());
        let nb_words = log_pos.len_of(Axis(1)) * log_pos.len_of(Axis(2));
        if nb_words == 0 {
            return 0.0;
        }

        let mut total = 0.0f64;
        for (k, (lp, q)) in log_pos
            .outer_iter()
            .zip(noise.outer_iter())
            .enumerate()
        {
            Zip::from(&lp).and(&q).for_each(|&lp, &q| {
                let x = self.log_odds(lp, q);
                // sigmoid(-x) == neg / (pos + neg)
                let p = if k == 0 { Sigmoid.f(x) } else { Sigmoid.f(-x) };
                total += (EPSILON + p).ln() as f64;
            });
        }
        -(total / nb_words as f64) as f32
    }

    /// ∂loss/∂log_pos, same shape as `log_pos`.
    pub fn deriv(&self, log_pos: ArrayView3<'_, f32>, noise: ArrayView3<'_, f32>) -> Array3<f32> {
        assert_eq!(log_pos.shape(), noise.shape());
        let nb_words = (log_pos.len_of(Axis(1)) * log_pos.len_of(Axis(2))).max(1) as f32;

        let mut d = Array3::<f32>::zeros(log_pos.raw_dim());
        for (k, mut slot) in d.outer_iter_mut().enumerate() {
            Zip::from(&mut slot)
                .and(log_pos.index_axis(Axis(0), k))
                .and(noise.index_axis(Axis(0), k))
                .for_each(|g, &lp, &q| {
                    let x = self.log_odds(lp, q);
                    let r = Sigmoid.f(x);
                    let r_bar = Sigmoid.f(-x);
                    // d/dx log(eps + r) = r (1 - r) / (eps + r), and
                    // d/dx log(eps + 1 - r) = -r (1 - r) / (eps + 1 - r).
                    let dterm = if k == 0 {
                        r * r_bar / (EPSILON + r)
                    } else {
                        -(r * r_bar) / (EPSILON + r_bar)
                    };
                    *g = -dterm / nb_words;
                });
        }
        d
    }
}

/// Everything one call to the test step reports about one sub-batch.
///
/// All fields except `loss` are sums over the sub-batch's words, so batches
/// can be combined just by adding.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchMetrics {
    /// NCE loss, averaged per word.
    pub loss: f64,
    /// Cross-entropy of the true tokens under the exact softmax, in nats.
    pub encode_len: f64,
    pub nb_words: f64,
    /// Sum of `Z * n`: the exact partition function rescaled by the learned
    /// normalizer. Ideally 1 at every position.
    pub sum_partition: f64,
    pub sum_sq_partition: f64,
    /// Sum of `1 / n`, the partition function as predicted by the normalizer.
    pub z_pred: f64,
    /// Sum of the exact partition function `Z`.
    pub z_true: f64,
    /// Sum of `|1 / n - Z|`.
    pub z_err: f64,
    pub z_sq: f64,
}

impl BatchMetrics {
    /// Compute the metrics for one sub-batch.
    ///
    /// `exact_logits` has one row per word, one column per vocabulary item.
    /// `targets` holds the true token of each row and `normalizer` the learned
    /// normalizer output `n` for that position.
    pub fn evaluate(
        loss: f32,
        exact_logits: ArrayView2<'_, f32>,
        targets: ArrayView1<'_, usize>,
        normalizer: ArrayView1<'_, f32>,
    ) -> Self {
        let nb_words = exact_logits.nrows();
        assert_eq!(targets.len(), nb_words);
        assert_eq!(normalizer.len(), nb_words);

        let mut m = BatchMetrics {
            loss: loss as f64,
            nb_words: nb_words as f64,
            ..BatchMetrics::default()
        };
        Zip::from(exact_logits.rows())
            .and(&targets)
            .and(&normalizer)
            .for_each(|logits, &target, &n| {
                let max = logits.fold(f32::NEG_INFINITY, |a, &b| a.max(b)) as f64;
                let sum: f64 = logits.iter().map(|&l| (l as f64 - max).exp()).sum();
                let log_z = max + sum.ln();
                let z = log_z.exp();
                let n = n as f64;

                m.encode_len += log_z - logits[target] as f64;
                let partition = z * n;
                m.sum_partition += partition;
                m.sum_sq_partition += partition * partition;
                let z_hat = 1.0 / (n + EPSILON_F64);
                m.z_pred += z_hat;
                m.z_true += z;
                m.z_err += (z_hat - z).abs();
                m.z_sq += z * z;
            });
        m
    }
}

/// Running totals across sub-batches. Combining in any grouping gives the
/// same summary as evaluating the union in one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSums {
    weighted_loss: f64,
    encode_len: f64,
    nb_words: f64,
    sum_partition: f64,
    sum_sq_partition: f64,
    z_pred: f64,
    z_true: f64,
    z_err: f64,
    z_sq: f64,
}

impl MetricSums {
    pub fn add(&mut self, m: &BatchMetrics) {
        self.weighted_loss += m.loss * m.nb_words;
        self.encode_len += m.encode_len;
        self.nb_words += m.nb_words;
        self.sum_partition += m.sum_partition;
        self.sum_sq_partition += m.sum_sq_partition;
        self.z_pred += m.z_pred;
        self.z_true += m.z_true;
        self.z_err += m.z_err;
        self.z_sq += m.z_sq;
    }

    pub fn nb_words(&self) -> f64 {
        self.nb_words
    }

    /// Corpus-level summary, or `None` if nothing has been added.
    pub fn summarize(&self) -> Option<ValidationReport> {
        if self.nb_words <= 0.0 {
            return None;
        }
        let n = self.nb_words;
        let partition_mean = self.sum_partition / n;
        let z_true = self.z_true / n;
        Some(ValidationReport {
            nb_words: n,
            loss: self.weighted_loss / n,
            perplexity: (self.encode_len / n).exp(),
            partition_mean,
            partition_var: variance(partition_mean, self.sum_sq_partition / n),
            z_pred: self.z_pred / n,
            z_true,
            z_err: self.z_err / n,
            z_var: variance(z_true, self.z_sq / n),
        })
    }
}

/// `E[x²] - E[x]²`. Mathematically never negative; anything more negative
/// than rounding error means the sums were built wrong.
fn variance(mean: f64, mean_sq: f64) -> f64 {
    let var = mean_sq - mean * mean;
    debug_assert!(
        var >= -1e-9 * mean_sq.abs().max(1.0),
        "negative variance {var} (mean {mean}, mean of squares {mean_sq})"
    );
    var.max(0.0)
}

/// Corpus-level validation results. Means are per word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationReport {
    pub nb_words: f64,
    pub loss: f64,
    pub perplexity: f64,
    pub partition_mean: f64,
    pub partition_var: f64,
    pub z_pred: f64,
    pub z_true: f64,
    pub z_err: f64,
    pub z_var: f64,
}

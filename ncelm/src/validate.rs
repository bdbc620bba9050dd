//! Evaluating the model on held-out batches.

use anyhow::Result;
use ndarray::prelude::*;

use crate::loss::{MetricSums, ValidationReport};
use crate::model::NceModel;
use crate::runlog::RunLog;
use crate::sampler::NegativeSampler;

#[derive(Debug, Clone, Copy)]
pub struct Validator {
    sub_batch_size: usize,
}

impl Validator {
    pub fn new(sub_batch_size: usize) -> Self {
        assert!(sub_batch_size > 0);
        Validator { sub_batch_size }
    }

    /// Augment every batch with fresh noise and evaluate it.
    ///
    /// Returns `None` if `batches` holds no words.
    pub fn run(
        &self,
        model: &NceModel,
        sampler: &mut NegativeSampler,
        batches: &[Array2<usize>],
    ) -> Option<ValidationReport> {
        let mut sums = MetricSums::default();
        for batch in batches {
            let augmented = sampler.negative_sample(batch.view());
            self.test_batch(model, augmented.view(), &mut sums);
        }
        sums.summarize()
    }

    /// Evaluate one augmented batch `(slots, N, T)`, `sub_batch_size`
    /// sentences at a time, adding the results to `sums`.
    pub fn test_batch(&self, model: &NceModel, augmented: ArrayView3<'_, usize>, sums: &mut MetricSums) {
        for chunk in augmented.axis_chunks_iter(Axis(1), self.sub_batch_size) {
            sums.add(&model.test(chunk));
        }
    }
}

/// Write a report to the console log and the run log.
pub fn log_report(report: &ValidationReport, run_log: &mut RunLog) -> Result<()> {
    log::info!(
        "NceLangModel:Val val_loss: {:.2} - val_ppl: {:.2} - partition: mean: {:.2} var: {:.2} - z: pred: {:.2} true: {:.2} err: {:.2} var: {:.2}",
        report.loss,
        report.perplexity,
        report.partition_mean,
        report.partition_var,
        report.z_pred,
        report.z_true,
        report.z_err,
        report.z_var,
    );
    run_log.info(format_args!(
        "NceLangModel:Val - words: {} - val_loss: {:.6} - val_ppl: {:.6} - partition_mean: {:.6} - partition_var: {:.6} - z_pred: {:.6} - z_true: {:.6} - z_err: {:.6} - z_var: {:.6}",
        report.nb_words,
        report.loss,
        report.perplexity,
        report.partition_mean,
        report.partition_var,
        report.z_pred,
        report.z_true,
        report.z_err,
        report.z_var,
    ))
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::config::OptimizerConfig;
    use crate::model::ModelDims;
    use crate::sampler::{TableSampler, UnigramTable};

    fn setup() -> (NceModel, NegativeSampler) {
        let table = UnigramTable::from_counts(&[3, 1, 4, 1, 5, 9]).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let dims = ModelDims {
            vocab_size: 6,
            embed_dims: 3,
            context_dims: 3,
        };
        let model = NceModel::new(dims, 2, table.clone(), &OptimizerConfig::default(), &mut rng).unwrap();
        let sampler = NegativeSampler::new(TableSampler::new(&table, rng).unwrap(), 2, 0).unwrap();
        (model, sampler)
    }

    #[test]
    fn sub_batch_size_does_not_change_the_summary() {
        let (model, mut sampler) = setup();
        let batch = array![[0usize, 1, 2, 3], [4, 5, 0, 1], [2, 2, 3, 3], [5, 4, 3, 2]];
        let augmented = sampler.negative_sample(batch.view());

        let summarize = |sub_batch_size| {
            let mut sums = MetricSums::default();
            Validator::new(sub_batch_size).test_batch(&model, augmented.view(), &mut sums);
            sums.summarize().unwrap()
        };
        let whole = summarize(4);
        let halves = summarize(2);
        let uneven = summarize(3);
        for other in [halves, uneven] {
            for (a, b) in [
                (whole.loss, other.loss),
                (whole.perplexity, other.perplexity),
                (whole.partition_mean, other.partition_mean),
                (whole.partition_var, other.partition_var),
                (whole.z_pred, other.z_pred),
                (whole.z_true, other.z_true),
                (whole.z_err, other.z_err),
                (whole.z_var, other.z_var),
            ] {
                assert!((a - b).abs() <= 1e-5 * a.abs().max(1.0), "{a} != {b}");
            }
        }
        assert_eq!(whole.nb_words, 16.0);
    }

    #[test]
    fn empty_validation_set_has_no_report() {
        let (model, mut sampler) = setup();
        assert!(Validator::new(8).run(&model, &mut sampler, &[]).is_none());
    }

    #[test]
    fn report_is_sane() {
        let (model, mut sampler) = setup();
        let batches = vec![array![[0usize, 1, 2]], array![[5usize, 4], [3, 2]]];
        let report = Validator::new(8).run(&model, &mut sampler, &batches).unwrap();
        assert_eq!(report.nb_words, 7.0);
        assert!(report.loss.is_finite() && report.loss > 0.0);
        assert!(report.perplexity > 1.0);
        assert!(report.partition_var >= 0.0 && report.z_var >= 0.0);

        let mut run_log = RunLog::disabled();
        log_report(&report, &mut run_log).unwrap();
    }
}

//! The language model and its train/test steps.
//!
//! ```text
//! ids[0] ─ Embedding ─ Shift ─ LSTM ─ h ─┬─ SoftmaxScorer (partial) ─ s ─┐
//!                                        └─ Dense(1) ─ exp ───────── n ──┼─ NCE loss
//! ids ───────────────────────────────── NoiseLookup ───────────────── q ─┘
//! ```
//!
//! The shift means the context at position `t` has seen only tokens before
//! `t`, so the model predicts each token from its prefix.

use std::ops::Range;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use ndarray::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

use myml::layers::{ActivationLayer, DenseLayer, Embedding, Exponential, LstmLayer, Sequence, ShiftLayer};
use myml::optim::{Adam, Anneal};
use myml::{Layer, Optimizer};

use crate::checkpoint::{Checkpoint, NamedTensor};
use crate::config::OptimizerConfig;
use crate::loss::{BatchMetrics, NceObjective};
use crate::sampler::UnigramTable;
use crate::scorer::{NoiseLookup, SoftmaxScorer};

/// Standard deviation of the initial parameters.
const INIT_SCALE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDims {
    pub vocab_size: usize,
    pub embed_dims: usize,
    pub context_dims: usize,
}

/// One named tensor inside the flat parameter vector.
#[derive(Debug, Clone)]
struct Segment {
    name: &'static str,
    shape: Vec<usize>,
    range: Range<usize>,
}

/// Where each block's parameters live in the flat vector.
#[derive(Debug, Clone)]
struct ParamLayout {
    embedding: Range<usize>,
    encoder: Range<usize>,
    scorer: Range<usize>,
    normalizer: Range<usize>,
    segments: Vec<Segment>,
}

impl ParamLayout {
    fn new(dims: ModelDims, block_sizes: [usize; 4]) -> Self {
        let ModelDims {
            vocab_size: v,
            embed_dims: e,
            context_dims: c,
        } = dims;
        let shapes: [(&'static str, Vec<usize>); 8] = [
            ("embedding.W", vec![v, e]),
            ("context.W", vec![e, 4 * c]),
            ("context.U", vec![c, 4 * c]),
            ("context.b", vec![4 * c]),
            ("softmax.W", vec![c, v]),
            ("softmax.b", vec![v]),
            ("normalizer.W", vec![c, 1]),
            ("normalizer.b", vec![1]),
        ];
        let mut start = 0;
        let segments: Vec<Segment> = shapes
            .into_iter()
            .map(|(name, shape)| {
                let len: usize = shape.iter().product();
                let range = start..start + len;
                start += len;
                Segment { name, shape, range }
            })
            .collect();

        let mut start = 0;
        let mut blocks = block_sizes.map(|len| {
            let range = start..start + len;
            start += len;
            range
        });
        assert_eq!(
            start,
            segments.last().map_or(0, |s| s.range.end),
            "named tensors should cover exactly the layers' parameters"
        );
        ParamLayout {
            embedding: std::mem::take(&mut blocks[0]),
            encoder: std::mem::take(&mut blocks[1]),
            scorer: std::mem::take(&mut blocks[2]),
            normalizer: std::mem::take(&mut blocks[3]),
            segments,
        }
    }

    fn num_params(&self) -> usize {
        self.normalizer.end
    }
}

/// Everything the backward pass needs from the forward pass.
#[derive(Debug)]
pub struct Forward {
    /// The augmented batch, with out-of-vocabulary ids clamped.
    pub ids: Array3<usize>,
    embedded: Array3<f32>,
    encoder_tmp: Array1<f32>,
    /// Context vectors `h`, shape `(N, T, context_dims)`.
    pub context: Array3<f32>,
    normalizer_tmp: Array1<f32>,
    /// Learned normalizer `n`, shape `(N * T, 1)`.
    pub normalizer: Array2<f32>,
    /// Partial logits `s` for every slot, shape `(slots, N, T)`.
    pub logits: Array3<f32>,
    /// Noise probabilities `q`, same shape as `logits`.
    pub noise: Array3<f32>,
}

impl Forward {
    /// `log(exp(s) * n)`, broadcast over slots.
    pub fn log_pos(&self) -> Array3<f32> {
        let (_, n, steps) = self.logits.dim();
        let log_n = self
            .normalizer
            .mapv(f32::ln)
            .into_shape((n, steps))
            .expect("normalizer has one entry per position");
        &self.logits + &log_n
    }
}

pub struct NceModel {
    dims: ModelDims,
    embedding: Embedding,
    encoder: Sequence<ShiftLayer, LstmLayer>,
    scorer: SoftmaxScorer,
    normalizer: Sequence<DenseLayer, ActivationLayer<Exponential>>,
    noise: NoiseLookup,
    objective: NceObjective,
    layout: ParamLayout,
    params: Array1<f32>,
    optimizer: Box<dyn Optimizer>,
}

impl std::fmt::Debug for NceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NceModel")
            .field("dims", &self.dims)
            .field("num_params", &self.params.len())
            .field("optimizer", &self.optimizer)
            .finish_non_exhaustive()
    }
}

/// Build the optimizer described by `config` for a model with `num_params`
/// parameters.
pub fn build_optimizer(config: &OptimizerConfig, num_params: usize) -> Box<dyn Optimizer> {
    let adam = Adam::new(num_params, config.learning_rate);
    if config.decay {
        Box::new(adam.with_anneal(Anneal {
            lr_min: config.lr_min,
            gamma: config.gamma,
        }))
    } else {
        Box::new(adam)
    }
}

impl NceModel {
    pub fn new<R: Rng + ?Sized>(
        dims: ModelDims,
        nb_negative: usize,
        table: UnigramTable,
        optimizer: &OptimizerConfig,
        rng: &mut R,
    ) -> Result<Self> {
        ensure!(
            dims.vocab_size > 0 && dims.embed_dims > 0 && dims.context_dims > 0,
            "model dimensions must be positive: {dims:?}"
        );
        ensure!(
            table.vocab_size() == dims.vocab_size,
            "unigram table covers {} items but the vocabulary has {}",
            table.vocab_size(),
            dims.vocab_size
        );
        ensure!(nb_negative > 0, "need at least one negative sample");

        let embedding = Embedding::new(dims.vocab_size, dims.embed_dims);
        let encoder = ShiftLayer::new().then(LstmLayer::new(dims.embed_dims, dims.context_dims));
        let scorer = SoftmaxScorer::new(dims.context_dims, dims.vocab_size);
        let normalizer = DenseLayer::new(dims.context_dims, 1).exponential();
        let layout = ParamLayout::new(
            dims,
            [
                embedding.num_params(),
                Layer::<Ix3>::num_params(&encoder),
                scorer.num_params(),
                Layer::<Ix2>::num_params(&normalizer),
            ],
        );
        let num_params = layout.num_params();
        let params = myml::random_params(num_params, INIT_SCALE, rng);
        log::info!("model has {num_params} parameters");

        Ok(NceModel {
            dims,
            embedding,
            encoder,
            scorer,
            normalizer,
            noise: NoiseLookup::new(table),
            objective: NceObjective::new(nb_negative),
            layout,
            params,
            optimizer: build_optimizer(optimizer, num_params),
        })
    }

    /// Replace the optimizer. Its state is not carried over.
    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn dims(&self) -> ModelDims {
        self.dims
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> ArrayView1<'_, f32> {
        self.params.view()
    }

    pub fn params_mut(&mut self) -> ArrayViewMut1<'_, f32> {
        self.params.view_mut()
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.learning_rate()
    }

    fn block(&self, range: &Range<usize>) -> ArrayView1<'_, f32> {
        self.params.slice(s![range.clone()])
    }

    /// Run the whole graph on an augmented batch `(slots, N, T)`.
    ///
    /// Ids past the end of the vocabulary are treated as the last id.
    pub fn forward(&self, ids: ArrayView3<'_, usize>) -> Forward {
        let max_id = self.dims.vocab_size - 1;
        let ids = ids.mapv(|id| id.min(max_id));
        let (_, n, steps) = ids.dim();
        let truth = ids.index_axis(Axis(0), 0);

        let mut embedded = Array3::zeros(self.embedding.output_shape(truth.raw_dim()));
        self.embedding
            .apply(self.block(&self.layout.embedding), truth, embedded.view_mut());

        let mut encoder_tmp = Array1::zeros(self.encoder.num_hidden_activations(embedded.raw_dim()));
        let mut context = Array3::zeros(self.encoder.output_shape(embedded.raw_dim()));
        self.encoder.apply(
            self.block(&self.layout.encoder),
            embedded.view(),
            encoder_tmp.view_mut(),
            context.view_mut(),
        );

        let flat = context
            .view()
            .into_shape((n * steps, self.dims.context_dims))
            .expect("context should be contiguous");
        let mut normalizer_tmp = Array1::zeros(self.normalizer.num_hidden_activations(flat.raw_dim()));
        let mut normalizer = Array2::zeros(self.normalizer.output_shape(flat.raw_dim()));
        self.normalizer.apply(
            self.block(&self.layout.normalizer),
            flat,
            normalizer_tmp.view_mut(),
            normalizer.view_mut(),
        );

        let logits = self
            .scorer
            .partial_logits(self.block(&self.layout.scorer), ids.view(), context.view());
        let noise = self.noise.lookup(ids.view());

        Forward {
            ids,
            embedded,
            encoder_tmp,
            context,
            normalizer_tmp,
            normalizer,
            logits,
            noise,
        }
    }

    /// Given ∂L/∂log_pos, compute ∂L/∂params.
    pub fn backward(&self, fwd: &Forward, dlog_pos: ArrayView3<'_, f32>) -> Array1<f32> {
        let (_, n, steps) = fwd.ids.dim();
        let mut grads = Array1::zeros(self.params.len());

        // log_pos = s + log n, so ∂L/∂s is ∂L/∂log_pos itself.
        let mut dcontext = self.scorer.partial_derivatives(
            self.block(&self.layout.scorer),
            fwd.ids.view(),
            fwd.context.view(),
            dlog_pos,
            grads.slice_mut(s![self.layout.scorer.clone()]),
        );

        // Every slot at a position shares that position's n.
        let dlog_n = dlog_pos
            .sum_axis(Axis(0))
            .into_shape((n * steps, 1))
            .expect("sum should be contiguous");
        let dn = dlog_n / &fwd.normalizer;
        let flat = fwd
            .context
            .view()
            .into_shape((n * steps, self.dims.context_dims))
            .expect("context should be contiguous");
        let dflat = self.normalizer.derivatives(
            self.block(&self.layout.normalizer),
            flat,
            fwd.normalizer_tmp.view(),
            dn.view(),
            grads.slice_mut(s![self.layout.normalizer.clone()]),
        );
        dcontext += &dflat
            .into_shape((n, steps, self.dims.context_dims))
            .expect("derivatives should be contiguous");

        let dembedded = self.encoder.derivatives(
            self.block(&self.layout.encoder),
            fwd.embedded.view(),
            fwd.encoder_tmp.view(),
            dcontext.view(),
            grads.slice_mut(s![self.layout.encoder.clone()]),
        );
        self.embedding.derivatives(
            fwd.ids.index_axis(Axis(0), 0),
            dembedded.view(),
            grads.slice_mut(s![self.layout.embedding.clone()]),
        );
        grads
    }

    /// NCE loss on an augmented batch, without updating anything.
    pub fn loss(&self, ids: ArrayView3<'_, usize>) -> f32 {
        let fwd = self.forward(ids);
        self.objective.loss(fwd.log_pos().view(), fwd.noise.view())
    }

    /// One optimizer step on an augmented batch. Returns the loss before the
    /// update.
    pub fn train(&mut self, ids: ArrayView3<'_, usize>) -> f32 {
        let fwd = self.forward(ids);
        let log_pos = fwd.log_pos();
        let loss = self.objective.loss(log_pos.view(), fwd.noise.view());
        let dlog_pos = self.objective.deriv(log_pos.view(), fwd.noise.view());
        let grads = self.backward(&fwd, dlog_pos.view());
        self.optimizer.update(self.params.view_mut(), grads.view());
        loss
    }

    /// NCE loss plus exact-softmax metrics for an augmented batch. Never
    /// changes the parameters.
    pub fn test(&self, ids: ArrayView3<'_, usize>) -> BatchMetrics {
        let fwd = self.forward(ids);
        let loss = self.objective.loss(fwd.log_pos().view(), fwd.noise.view());

        let (_, n, steps) = fwd.ids.dim();
        let flat = fwd
            .context
            .view()
            .into_shape((n * steps, self.dims.context_dims))
            .expect("context should be contiguous");
        let logits = self.scorer.exact_logits(self.block(&self.layout.scorer), flat);
        let targets = fwd
            .ids
            .index_axis(Axis(0), 0)
            .to_owned()
            .into_shape(n * steps)
            .expect("owned arrays are contiguous");
        BatchMetrics::evaluate(loss, logits.view(), targets.view(), fwd.normalizer.column(0))
    }

    /// Every parameter tensor, by name.
    pub fn checkpoint(&self) -> Checkpoint {
        let tensors = self
            .layout
            .segments
            .iter()
            .map(|seg| NamedTensor {
                name: seg.name.to_string(),
                shape: seg.shape.clone(),
                data: self.params.slice(s![seg.range.clone()]).to_vec(),
            })
            .collect();
        Checkpoint {
            dims: self.dims,
            tensors,
        }
    }

    /// Overwrite the parameters with those in `checkpoint`. Fails, leaving
    /// the model untouched, if any tensor is missing or has the wrong shape.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        ensure!(
            checkpoint.dims == self.dims,
            "checkpoint is for a model of shape {:?}, not {:?}",
            checkpoint.dims,
            self.dims
        );
        let mut params = self.params.clone();
        for seg in &self.layout.segments {
            let tensor = checkpoint
                .get(seg.name)
                .with_context(|| format!("checkpoint has no tensor named {:?}", seg.name))?;
            ensure!(
                tensor.shape == seg.shape && tensor.data.len() == seg.range.len(),
                "tensor {:?} has shape {:?} ({} values), expected {:?}",
                seg.name,
                tensor.shape,
                tensor.data.len(),
                seg.shape
            );
            params
                .slice_mut(s![seg.range.clone()])
                .assign(&ArrayView1::from(&tensor.data[..]));
        }
        self.params = params;
        Ok(())
    }

    pub fn save_params(&self, path: &Path) -> Result<()> {
        self.checkpoint().save(path)?;
        log::info!("saved parameters to {path:?}");
        Ok(())
    }

    pub fn load_params(&mut self, path: &Path) -> Result<()> {
        let checkpoint = Checkpoint::load(path)?;
        self.restore(&checkpoint)
            .with_context(|| format!("can't load parameters from {path:?}"))
    }
}

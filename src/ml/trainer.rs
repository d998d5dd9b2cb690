// ============================================================
// Layer 5 — Teacher Training Loop
// ============================================================
// Trains one randomly initialised network with SGD and records
// its trajectory:
//
//   snapshot(θ₀)
//   for epoch in 0..epochs:
//       for batch in shuffled train loader:
//           forward → loss → backward → SGD step
//       snapshot(θ_epoch)
//
// so a finished trajectory always holds epochs + 1 snapshots.
//
// Optional LR decay multiplies the learning rate by 0.1 once, at
// epoch epochs / 2 + 1, and restarts the optimiser state.

use std::sync::Arc;

use anyhow::{bail, Result};
use burn::{
    data::dataloader::DataLoader,
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{
        decay::WeightDecayConfig,
        momentum::MomentumConfig,
        GradientsParams, Optimizer, SgdConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::ImageBatch;
use crate::domain::trajectory::{HostTensor, Snapshot, Trajectory};
use crate::ml::{loss::Criterion, model::{Network, NetworkConfig}};

pub type Loader<B> = Arc<dyn DataLoader<ImageBatch<B>>>;

/// Optimisation settings shared by every expert.
#[derive(Debug, Clone)]
pub struct TeacherParams {
    pub epochs:       usize,
    pub lr:           f64,
    pub momentum:     f64,
    pub weight_decay: f64,
    pub decay:        bool,
    pub criterion:    Criterion,
}

impl TeacherParams {
    fn optimizer_config(&self) -> SgdConfig {
        SgdConfig::new()
            .with_momentum(Some(
                MomentumConfig::new()
                    .with_momentum(self.momentum)
                    .with_dampening(0.0),
            ))
            .with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay as f32)))
    }

    /// Epoch index (0-based) at which the learning rate drops, if any.
    pub fn decay_epoch(&self) -> Option<usize> {
        self.decay.then_some(self.epochs / 2 + 1)
    }
}

/// What happened in one epoch of one expert.
#[derive(Debug, Clone)]
pub struct EpochStats {
    pub epoch:      usize,
    pub lr:         f64,
    pub train_loss: f64,
    pub test_loss:  Option<f64>,
}

/// A finished expert: its trajectory and final weights.
pub struct ExpertRun<B: AutodiffBackend> {
    pub trajectory: Trajectory,
    pub model:      Network<B>,
    pub epochs:     Vec<EpochStats>,
}

// ─── Snapshots ────────────────────────────────────────────────────────────────

struct ParamCollector {
    params: Snapshot,
    error:  Option<anyhow::Error>,
}

impl<B: Backend> ModuleVisitor<B> for ParamCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        if self.error.is_some() {
            return;
        }
        match HostTensor::from_tensor(tensor) {
            Ok(t)  => self.params.push(t),
            Err(e) => self.error = Some(e),
        }
    }
}

/// Copy every float parameter of `module` to host memory, in visiting order.
pub fn snapshot<B: Backend, M: Module<B>>(module: &M) -> Result<Snapshot> {
    let mut collector = ParamCollector { params: Vec::new(), error: None };
    module.visit(&mut collector);
    match collector.error {
        Some(e) => Err(e),
        None    => Ok(collector.params),
    }
}

// ─── Epochs ───────────────────────────────────────────────────────────────────

/// One pass over `loader` with gradient updates. Returns the model and
/// the per-example mean loss.
pub fn train_epoch<B, O>(
    mut model: Network<B>,
    optim:     &mut O,
    loader:    &Loader<B>,
    criterion: Criterion,
    lr:        f64,
) -> Result<(Network<B>, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<Network<B>, B>,
{
    let mut loss_sum = 0.0f64;
    let mut seen     = 0usize;
    let mut diverged = 0usize;

    for batch in loader.iter() {
        let n      = batch.len();
        let output = model.forward(batch.images);
        let loss   = criterion.loss(output, &batch.targets)?;

        let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
        if !loss_val.is_finite() {
            diverged += 1;
        }
        loss_sum += loss_val * n as f64;
        seen     += n;

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(lr, model, grads);
    }

    if seen == 0 {
        bail!("training loader produced no batches");
    }
    if diverged > 0 {
        tracing::warn!("{} batch(es) produced a non-finite training loss", diverged);
    }
    Ok((model, loss_sum / seen as f64))
}

/// Per-example mean loss over `loader` without gradient tracking.
pub fn eval_epoch<B: Backend>(
    model:     &Network<B>,
    loader:    &Loader<B>,
    criterion: Criterion,
) -> Result<f64> {
    let mut loss_sum = 0.0f64;
    let mut seen     = 0usize;
    for batch in loader.iter() {
        let n    = batch.len();
        let loss = criterion.loss(model.forward(batch.images), &batch.targets)?;
        loss_sum += loss.into_scalar().elem::<f64>() * n as f64;
        seen     += n;
    }
    if seen == 0 {
        bail!("evaluation loader produced no batches");
    }
    Ok(loss_sum / seen as f64)
}

// ─── Experts ──────────────────────────────────────────────────────────────────

/// Train one freshly initialised network and record its trajectory.
///
/// `on_epoch` runs after every epoch with the current weights, e.g. to
/// write a checkpoint or a metrics row.
pub fn train_expert<B, F>(
    net_cfg:     &NetworkConfig,
    params:      &TeacherParams,
    train:       &Loader<B>,
    test:        Option<&Loader<B::InnerBackend>>,
    device:      &B::Device,
    mut on_epoch: F,
) -> Result<ExpertRun<B>>
where
    B: AutodiffBackend,
    F: FnMut(&Network<B>, &EpochStats) -> Result<()>,
{
    let mut model: Network<B> = net_cfg.init(device);
    let mut optim = params.optimizer_config().init();
    let mut lr    = params.lr;

    let mut trajectory = Trajectory::new();
    trajectory.push(snapshot(&model)?)?;

    let mut epochs = Vec::with_capacity(params.epochs);
    for epoch in 0..params.epochs {
        if params.decay_epoch() == Some(epoch) {
            lr *= 0.1;
            optim = params.optimizer_config().init();
            tracing::info!("Learning rate decayed to {}", lr);
        }

        let (trained, train_loss) = train_epoch(model, &mut optim, train, params.criterion, lr)?;
        model = trained;

        let test_loss = match test {
            Some(loader) => Some(eval_epoch(&model.valid(), loader, params.criterion)?),
            None         => None,
        };

        let stats = EpochStats { epoch, lr, train_loss, test_loss };
        trajectory.push(snapshot(&model)?)?;
        on_epoch(&model, &stats)?;
        epochs.push(stats);
    }

    Ok(ExpertRun { trajectory, model, epochs })
}

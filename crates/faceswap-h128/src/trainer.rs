//! Joint optimization step over both domains.

use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use tracing::{debug, warn};

use faceswap_core::{Error, OptimizerConfig, Result};

use crate::loss::{LossComposer, StepLosses};
use crate::model::{AutoencoderH128, JointInputs, JointTargets};
use crate::samples::{expect_shape, SampleBatch};

/// Owns the model while it is being trained.
///
/// Steps take `&mut self`, so a single writer updates the parameters.
pub struct Trainer {
    model: AutoencoderH128,
    optimizer: AdamW,
    losses: LossComposer,
    iteration: u64,
}

impl Trainer {
    pub fn new(model: AutoencoderH128) -> Result<Self> {
        let config = model.config().optimizer.clone();
        Self::with_optimizer(model, &config)
    }

    pub fn with_optimizer(model: AutoencoderH128, config: &OptimizerConfig) -> Result<Self> {
        // Adam: AdamW without decoupled weight decay
        let params = ParamsAdamW {
            lr: config.learning_rate,
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.eps,
            weight_decay: 0.0,
        };
        let optimizer = AdamW::new(model.parameters().all_vars(), params)?;
        let losses = LossComposer::new(model.device())?;

        Ok(Self {
            model,
            optimizer,
            losses,
            iteration: 0,
        })
    }

    /// Run one update on a src batch and a dst batch.
    ///
    /// Returns the losses computed before the update. A non-finite total
    /// aborts the step before any parameter is touched.
    pub fn step(&mut self, src: &SampleBatch, dst: &SampleBatch) -> Result<StepLosses> {
        self.check_batches(src, dst)?;

        let inputs = JointInputs::from_batches(src, dst)?;
        let targets = JointTargets::from_batches(src, dst)?;
        let outputs = self.model.forward(&inputs)?;
        let terms = self.losses.compose(&inputs, &outputs, &targets)?;

        let losses = terms.to_scalars()?;
        if !losses.total.is_finite() {
            return Err(Error::NonFiniteLoss {
                total: losses.total,
            });
        }

        // Encoder gradients from both domain paths are summed in one store
        let grads = terms.total.backward()?;
        self.optimizer.step(&grads)?;
        self.iteration += 1;

        debug!(
            iteration = self.iteration,
            total = losses.total,
            src_color = losses.src_color,
            src_mask = losses.src_mask,
            dst_color = losses.dst_color,
            dst_mask = losses.dst_mask,
            "training step"
        );

        Ok(losses)
    }

    fn check_batches(&self, src: &SampleBatch, dst: &SampleBatch) -> Result<()> {
        let r = self.model.resolution();
        let n = src.len();
        for batch in [src, dst] {
            expect_shape("warped", &batch.warped, &[n, r, r, 3])?;
            expect_shape("target", &batch.target, &[n, r, r, 3])?;
            expect_shape("target_mask", &batch.target_mask, &[n, r, r, 1])?;
        }

        if n > self.model.batch_size() {
            warn!(
                batch = n,
                bound = self.model.batch_size(),
                "batch exceeds the tier's batch-size bound"
            );
        }
        Ok(())
    }

    pub fn model(&self) -> &AutoencoderH128 {
        &self.model
    }

    pub fn into_model(self) -> AutoencoderH128 {
        self.model
    }

    /// Completed optimizer updates
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn save(&self) -> Result<()> {
        self.model.save()
    }
}

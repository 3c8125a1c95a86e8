use crate::config::{GanMode, TrainingConfig};
use crate::error::TrainError;
use crate::model::{
    CheckpointSuffix, FAKE_B, LossRecord, Phase, REAL_A, REAL_B, TranslationModel, Visuals,
    architecture::{Discriminator, Generator, ModelConfig},
    checkpoint::{load_module, save_module},
    data::PairBatch,
    scheduler::LrScheduler,
};

use burn::{
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction::Mean},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{ElementConversion, activation::sigmoid, backend::AutodiffBackend},
};
use std::path::PathBuf;

/// Conditional GAN: the generator maps A to B, the discriminator judges
/// `(A, B)` pairs patch by patch.
pub struct Pix2PixModel<B: AutodiffBackend, OG, OD> {
    generator: Generator<B>,
    discriminator: Discriminator<B>,
    optim_g: OG,
    optim_d: OD,
    scheduler: LrScheduler,
    lr: f64,
    gan_mode: GanMode,
    lambda_l1: f64,
    /// Weight of the identity term, zero when disabled.
    lambda_identity: f64,
    checkpoint_dir: PathBuf,
    input: Option<PairBatch<B>>,
    losses: LossRecord,
    visuals: Option<Visuals<B::InnerBackend>>,
    phase: Phase,
    /// Gradient-free copy of the generator, alive while in [`Phase::Eval`].
    inference: Option<Generator<B::InnerBackend>>,
}

/// Builds generator, discriminator and their Adam optimisers, restoring
/// weights from the experiment directory when `continue_train` is set.
pub fn pix2pix<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<
    Pix2PixModel<
        B,
        impl Optimizer<Generator<B>, B> + use<B>,
        impl Optimizer<Discriminator<B>, B> + use<B>,
    >,
    TrainError,
> {
    let model_config = ModelConfig::from_training(config);
    let mut generator: Generator<B> = model_config.generator.init(device);
    let mut discriminator: Discriminator<B> = model_config.discriminator.init(device);
    let checkpoint_dir = config.experiment_dir();

    if config.continue_train {
        let suffix = config
            .load_suffix
            .clone()
            .map(CheckpointSuffix::Named)
            .unwrap_or(CheckpointSuffix::Latest);
        generator = load_module(generator, &checkpoint_dir, &format!("{suffix}_net_G"), device)?;
        discriminator =
            load_module(discriminator, &checkpoint_dir, &format!("{suffix}_net_D"), device)?;
        log::info!("Loaded networks `{suffix}` from {}", checkpoint_dir.display());
    }

    let optim_g = AdamConfig::new()
        .with_beta_1(config.beta1 as f32)
        .with_beta_2(0.999)
        .init::<B, Generator<B>>();
    let optim_d = AdamConfig::new()
        .with_beta_1(config.beta1 as f32)
        .with_beta_2(0.999)
        .init::<B, Discriminator<B>>();

    let scheduler = LrScheduler::new(config);
    let identity_enabled = config.input_nc == config.output_nc && config.lambda_identity > 0.0;

    Ok(Pix2PixModel {
        generator,
        discriminator,
        optim_g,
        optim_d,
        lr: scheduler.get_lr(),
        scheduler,
        gan_mode: config.gan_mode,
        lambda_l1: config.lambda_a,
        lambda_identity: if identity_enabled {
            config.lambda_identity * config.lambda_a
        } else {
            0.0
        },
        checkpoint_dir,
        input: None,
        losses: LossRecord::default(),
        visuals: None,
        phase: Phase::Train,
        inference: None,
    })
}

impl<B, OG, OD> Pix2PixModel<B, OG, OD>
where
    B: AutodiffBackend,
    OG: Optimizer<Generator<B>, B>,
    OD: Optimizer<Discriminator<B>, B>,
{
    fn gan_loss<const D: usize>(&self, prediction: Tensor<B, D>, target_is_real: bool) -> Tensor<B, 1> {
        let target = if target_is_real {
            prediction.ones_like()
        } else {
            prediction.zeros_like()
        };
        match self.gan_mode {
            GanMode::Vanilla => {
                binary_cross_entropy_with_continuous_targets(sigmoid(prediction), target)
            }
            GanMode::Lsgan => MseLoss::new().forward(prediction, target, Mean),
        }
    }
}

impl<B, OG, OD> TranslationModel for Pix2PixModel<B, OG, OD>
where
    B: AutodiffBackend,
    OG: Optimizer<Generator<B>, B>,
    OD: Optimizer<Discriminator<B>, B>,
{
    type Batch = PairBatch<B>;
    type Backend = B::InnerBackend;

    fn set_input(&mut self, batch: PairBatch<B>) {
        self.input = Some(batch);
    }

    fn optimize_parameters(&mut self) -> Result<(), TrainError> {
        let batch = self.input.as_ref().ok_or(TrainError::MissingInput)?;
        let real_a = batch.real_a.clone();
        let real_b = batch.real_b.clone();

        // --- 1. Train the Discriminator --- //
        let fake_b_detached = self.generator.forward(real_a.clone()).detach();
        let pred_fake = self
            .discriminator
            .forward(Tensor::cat(vec![real_a.clone(), fake_b_detached], 1));
        let loss_d_fake = self.gan_loss(pred_fake, false);
        let pred_real = self
            .discriminator
            .forward(Tensor::cat(vec![real_a.clone(), real_b.clone()], 1));
        let loss_d_real = self.gan_loss(pred_real, true);

        let loss_d = (loss_d_fake.clone() + loss_d_real.clone()) * 0.5;
        let grads_d = GradientsParams::from_grads(loss_d.backward(), &self.discriminator);
        self.discriminator = self
            .optim_d
            .step(self.lr, self.discriminator.clone(), grads_d);

        // --- 2. Train the Generator --- //
        let fake_b = self.generator.forward(real_a.clone());
        let pred_fake = self
            .discriminator
            .forward(Tensor::cat(vec![real_a.clone(), fake_b.clone()], 1));
        let loss_g_gan = self.gan_loss(pred_fake, true);
        let loss_g_l1 = (fake_b.clone() - real_b.clone()).abs().mean() * self.lambda_l1;

        let mut loss_g = loss_g_gan.clone() + loss_g_l1.clone();
        let mut loss_idt = None;
        if self.lambda_identity > 0.0 {
            let idt = self.generator.forward(real_b.clone());
            let loss = (idt - real_b.clone()).abs().mean() * self.lambda_identity;
            loss_g = loss_g + loss.clone();
            loss_idt = Some(loss);
        }

        let grads_g = GradientsParams::from_grads(loss_g.backward(), &self.generator);
        self.generator = self.optim_g.step(self.lr, self.generator.clone(), grads_g);

        let mut losses = LossRecord::default();
        losses.push("G_GAN", scalar(loss_g_gan));
        losses.push("G_L1", scalar(loss_g_l1));
        if let Some(loss) = loss_idt {
            losses.push("G_idt", scalar(loss));
        }
        losses.push("D_real", scalar(loss_d_real));
        losses.push("D_fake", scalar(loss_d_fake));

        self.visuals = Some(
            Visuals::default()
                .with(REAL_A, real_a.inner())
                .with(FAKE_B, fake_b.inner())
                .with(REAL_B, real_b.inner()),
        );

        if let Some((name, value)) = losses.iter().find(|(_, value)| !value.is_finite()) {
            if let Some(batch) = &self.input {
                log::warn!("{name} is {value} on batch {:?}", batch.paths);
            }
            return Err(TrainError::NonFiniteLoss {
                name: name.to_string(),
                value,
            });
        }
        self.losses = losses;
        Ok(())
    }

    fn test(&mut self) -> Result<(), TrainError> {
        let batch = self.input.as_ref().ok_or(TrainError::MissingInput)?;
        let real_a = batch.real_a.clone().inner();
        let real_b = batch.real_b.clone().inner();

        let generator = &self.generator;
        let fake_b = self
            .inference
            .get_or_insert_with(|| generator.valid())
            .forward(real_a.clone());

        self.visuals = Some(
            Visuals::default()
                .with(REAL_A, real_a)
                .with(FAKE_B, fake_b)
                .with(REAL_B, real_b),
        );
        Ok(())
    }

    fn current_visuals(&self) -> Result<Visuals<B::InnerBackend>, TrainError> {
        self.visuals.clone().ok_or(TrainError::MissingInput)
    }

    fn current_losses(&self) -> LossRecord {
        self.losses.clone()
    }

    fn update_learning_rate(&mut self) -> f64 {
        let old_lr = self.lr;
        self.lr = self.scheduler.step();
        log::info!("learning rate {:.7} -> {:.7}", old_lr, self.lr);
        self.lr
    }

    fn save_networks(&self, suffix: &CheckpointSuffix) -> Result<(), TrainError> {
        save_module(&self.generator, &self.checkpoint_dir, &format!("{suffix}_net_G"))?;
        save_module(&self.discriminator, &self.checkpoint_dir, &format!("{suffix}_net_D"))?;
        Ok(())
    }

    fn set_phase(&mut self, phase: Phase) {
        self.inference = match phase {
            Phase::Eval => Some(self.generator.valid()),
            Phase::Train => None,
        };
        self.phase = phase;
    }

    fn phase(&self) -> Phase {
        self.phase
    }
}

fn scalar<B: Backend>(loss: Tensor<B, 1>) -> f64 {
    loss.into_scalar().elem::<f64>()
}

// Manual BCE implementation
fn binary_cross_entropy_with_continuous_targets<B: Backend, const D: usize>(
    predictions: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    let eps = 1e-7; //to avoid log(0)
    let predictions = predictions.clamp(eps, 1.0 - eps);

    let loss = targets.clone() * predictions.clone().log()
        + (predictions.ones_like() - targets) * (predictions.ones_like() - predictions).log();
    -loss.mean()
}

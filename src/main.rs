mod config;
mod error;
mod eval;
mod logger;
mod model;
mod schedule;
#[cfg(test)]
mod testing;
mod trainer;
mod utils;

use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;

use crate::config::{TrainArgs, TrainingConfig};
use crate::eval::PooledFeatureExtractor;
use crate::logger::{ExperimentLogger, RunLogger};
use crate::model::data::{BatchSource, PairLoader};
use crate::model::training::pix2pix;

#[cfg(feature = "cuda")]
type MyBackend = burn::backend::Cuda<f32, i32>;
#[cfg(not(feature = "cuda"))]
type MyBackend = burn::backend::NdArray<f32>;
type MyAutodiffBackend = Autodiff<MyBackend>;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let args = TrainArgs::parse();
    let log_enabled = !args.no_log;
    let config = args.into_config().context("Failed to resolve training options")?;

    let device = <MyAutodiffBackend as Backend>::Device::default();
    run::<MyAutodiffBackend>(config, log_enabled, device)
}

fn run<B: AutodiffBackend>(config: TrainingConfig, log_enabled: bool, device: B::Device) -> Result<()> {
    B::seed(config.seed);

    let mut dataset_training =
        PairLoader::<B>::train(&config, device.clone()).context("Failed to load training split")?;
    log::info!(
        "The number of training images = {}",
        dataset_training.num_items()
    );

    let mut model = pix2pix::<B>(&config, &device).context("Failed to create model")?;

    let experiment_dir = config.experiment_dir();
    std::fs::create_dir_all(&experiment_dir)
        .with_context(|| format!("Failed to create {}", experiment_dir.display()))?;
    config
        .save(experiment_dir.join("train_opt.json"))
        .context("Failed to save training options")?;

    let mut dataset_eval =
        PairLoader::<B>::eval(&config, device.clone()).context("Failed to load eval split")?;
    log::info!("The number of eval images = {}", dataset_eval.num_items());

    let extractor = PooledFeatureExtractor::new(config.fid_pool_size);

    let mut run_logger = if log_enabled {
        Some(RunLogger::create(&config).context("Failed to create the run logger")?)
    } else {
        log::warn!("Logger is off");
        log::warn!("------------------- -------------- --------------------");
        log::warn!("------------------- LOGGING IS OFF --------------------");
        log::warn!("------------------- -------------- --------------------");
        None
    };

    let state = trainer::train(
        &mut model,
        &mut dataset_training,
        &mut dataset_eval,
        &extractor,
        &config,
        run_logger
            .as_mut()
            .map(|logger| logger as &mut dyn ExperimentLogger),
    )
    .context("Training failed")?;

    log::info!(
        "Finished training at epoch {} after {} iterations",
        state.epoch,
        state.total_iters
    );

    if let Some(logger) = run_logger.as_mut() {
        logger.finish().context("Failed to finish the run log")?;
    }
    Ok(())
}

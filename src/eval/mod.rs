pub mod fid;

use std::collections::BTreeMap;

use burn::prelude::*;
use rand::Rng;
use rand::seq::SliceRandom;

use crate::config::TrainingConfig;
use crate::error::TrainError;
use crate::logger::{ExperimentLogger, best_effort};
use crate::model::data::BatchSource;
use crate::model::{FAKE_B, Phase, REAL_B, TranslationModel, Visuals};

pub use fid::{FeatureExtractor, PooledFeatureExtractor, frechet_distance};

/// Metric name to value, as sent to the tracker.
pub type EvalLog = BTreeMap<String, f64>;

/// The options evaluation reads, captured once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    pub num_test: usize,
    pub input_nc: usize,
}

impl EvalConfig {
    /// `num_test` defaults to the whole eval split and never exceeds it.
    pub fn from_training(config: &TrainingConfig, eval_len: usize) -> Self {
        Self {
            num_test: config.num_test.unwrap_or(eval_len).min(eval_len),
            input_nc: config.input_nc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub samples: usize,
    pub fid: Option<f64>,
}

/// Pixel normalisation applied before feature extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    replicate_gray: bool,
    mean: f32,
    std: f32,
}

impl Normalizer {
    pub fn for_input_channels(input_nc: usize) -> Self {
        if input_nc == 1 {
            Self {
                replicate_gray: true,
                mean: 0.5,
                std: 0.5,
            }
        } else {
            Self {
                replicate_gray: false,
                mean: 0.0,
                std: 1.0,
            }
        }
    }

    pub fn apply<B: Backend>(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let images = if self.replicate_gray && images.dims()[1] == 1 {
            images.repeat_dim(1, 3)
        } else {
            images
        };
        images.sub_scalar(self.mean).div_scalar(self.std)
    }
}

/// Runs inference over at most `config.num_test` eval batches and scores the
/// generated `fake_B` against `real_B`. The model phase in effect before the
/// call is restored on every path.
pub fn evaluate<M, S, E, R>(
    model: &mut M,
    eval_data: &mut S,
    extractor: &E,
    config: &EvalConfig,
    logger: Option<&mut (dyn ExperimentLogger + '_)>,
    rng: &mut R,
) -> Result<EvalReport, TrainError>
where
    M: TranslationModel,
    S: BatchSource<Batch = M::Batch>,
    E: FeatureExtractor<M::Backend>,
    R: Rng + ?Sized,
{
    let previous = model.phase();
    model.set_phase(Phase::Eval);
    let collected = collect_visuals(model, eval_data, config.num_test);
    model.set_phase(previous);
    let total_visuals = collected?;

    let mut log = EvalLog::new();
    let fid = if total_visuals.len() < 2 {
        log::warn!(
            "Skipping FID, {} eval sample(s) collected and at least 2 are needed",
            total_visuals.len()
        );
        None
    } else {
        let normalizer = Normalizer::for_input_channels(config.input_nc);
        let real = normalizer.apply(stack(&total_visuals, REAL_B)?);
        let fake = normalizer.apply(stack(&total_visuals, FAKE_B)?);
        let fid = frechet_distance(extractor.features(real), extractor.features(fake))?;
        log.insert("FID".to_string(), fid);
        Some(fid)
    };

    if let Some(logger) = logger {
        best_effort(logger.plot_current_eval(&log), "eval metrics");
        if let Some(sample) = total_visuals.choose(rng) {
            match sample.to_images() {
                Ok(images) => {
                    best_effort(logger.display_current_results(&images), "eval images")
                }
                Err(err) => log::warn!("Could not render eval sample: {err}"),
            }
        }
    }

    Ok(EvalReport {
        samples: total_visuals.len(),
        fid,
    })
}

fn collect_visuals<M, S>(
    model: &mut M,
    eval_data: &mut S,
    num_test: usize,
) -> Result<Vec<Visuals<M::Backend>>, TrainError>
where
    M: TranslationModel,
    S: BatchSource<Batch = M::Batch>,
{
    let mut total_visuals = Vec::with_capacity(num_test);
    for batch in eval_data.batches().take(num_test) {
        model.set_input(batch?);
        model.test()?;
        total_visuals.push(model.current_visuals()?);
    }
    Ok(total_visuals)
}

fn stack<B: Backend>(visuals: &[Visuals<B>], label: &str) -> Result<Tensor<B, 4>, TrainError> {
    let tensors = visuals
        .iter()
        .map(|sample| sample.require(label))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Tensor::cat(tensors, 0))
}

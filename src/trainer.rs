use std::time::Instant;

use rand::{SeedableRng, rngs::StdRng};

use crate::config::TrainingConfig;
use crate::error::TrainError;
use crate::eval::{EvalConfig, FeatureExtractor, evaluate};
use crate::logger::{ExperimentLogger, best_effort};
use crate::model::data::BatchSource;
use crate::model::{CheckpointSuffix, TranslationModel};
use crate::schedule::Schedule;

/// Counters of the training loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrainingState {
    pub epoch: usize,
    /// Samples seen since the start of the run.
    pub total_iters: usize,
    /// Samples seen since the start of the current epoch.
    pub epoch_iter: usize,
}

/// Trains `model` for epochs `epoch_count ..= n_epochs + n_epochs_decay`.
///
/// Evaluation, loss printing and `latest` checkpoints fire on multiples of
/// their frequency in `total_iters`; epoch checkpoints on multiples of
/// `save_epoch_freq` in the epoch number. The first error from the model,
/// the data or a checkpoint write stops training.
pub fn train<M, S, V, E>(
    model: &mut M,
    train_data: &mut S,
    eval_data: &mut V,
    extractor: &E,
    config: &TrainingConfig,
    mut logger: Option<&mut (dyn ExperimentLogger + '_)>,
) -> Result<TrainingState, TrainError>
where
    M: TranslationModel,
    S: BatchSource<Batch = M::Batch>,
    V: BatchSource<Batch = M::Batch>,
    E: FeatureExtractor<M::Backend>,
{
    let schedule = Schedule::from_config(config)?;
    let eval_config = EvalConfig::from_training(config, eval_data.num_items());
    let dataset_size = train_data.num_items();
    let last_epoch = config.last_epoch();
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut state = TrainingState {
        epoch: config.epoch_count,
        ..Default::default()
    };
    let mut t_data = 0.0;

    for epoch in config.epoch_count..=last_epoch {
        let epoch_start_time = Instant::now();
        state.epoch = epoch;
        state.epoch_iter = 0;

        model.update_learning_rate();

        let mut iter_data_time = Instant::now();
        for batch in train_data.batches() {
            let batch = batch?;
            let iter_start_time = Instant::now();
            if schedule.print.fires(state.total_iters) {
                t_data = (iter_start_time - iter_data_time).as_secs_f64();
            }

            state.total_iters += config.batch_size;
            state.epoch_iter += config.batch_size;
            model.set_input(batch);
            model.optimize_parameters()?;

            let due = schedule.due(state.total_iters);
            if due.evaluate {
                let report = evaluate(
                    model,
                    eval_data,
                    extractor,
                    &eval_config,
                    logger.as_deref_mut(),
                    &mut rng,
                )?;
                match report.fid {
                    Some(fid) => log::info!(
                        "eval (epoch {epoch}, total_iters {}) FID: {fid:.3} over {} samples",
                        state.total_iters,
                        report.samples
                    ),
                    None => log::debug!("eval produced no FID"),
                }
            }

            if due.print {
                let losses = model.current_losses();
                let t_comp = iter_start_time.elapsed().as_secs_f64() / config.batch_size as f64;
                if let Some(logger) = logger.as_deref_mut() {
                    best_effort(
                        logger.print_current_losses(epoch, state.epoch_iter, &losses, t_comp, t_data),
                        "losses",
                    );
                    if config.display_id > 0 {
                        let counter_ratio = state.epoch_iter as f64 / dataset_size.max(1) as f64;
                        best_effort(
                            logger.plot_current_losses(epoch, counter_ratio, &losses),
                            "loss plot",
                        );
                    }
                }
            }

            if due.save_latest {
                log::info!(
                    "saving the latest model (epoch {epoch}, total_iters {})",
                    state.total_iters
                );
                let suffix = if config.save_by_iter {
                    CheckpointSuffix::Iter(state.total_iters)
                } else {
                    CheckpointSuffix::Latest
                };
                model.save_networks(&suffix)?;
            }

            iter_data_time = Instant::now();
        }

        if schedule.save_epoch_due(epoch) {
            log::info!(
                "saving the model at the end of epoch {epoch}, iters {}",
                state.total_iters
            );
            model.save_networks(&CheckpointSuffix::Latest)?;
            model.save_networks(&CheckpointSuffix::Epoch(epoch))?;
        }

        log::info!(
            "End of epoch {} / {} \t Time Taken: {} sec",
            epoch,
            last_epoch,
            epoch_start_time.elapsed().as_secs()
        );
    }

    Ok(state)
}

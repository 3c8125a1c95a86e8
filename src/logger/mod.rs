use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use serde_json::{Value, json};

use crate::config::TrainingConfig;
use crate::error::TrainError;
use crate::model::LossRecord;

/// Project name recorded in `run.json`.
pub const PROJECT: &str = "img2img_gan";

/// Sink for training progress. Every call may fail; the training loop treats
/// failures as warnings.
pub trait ExperimentLogger {
    /// Prints one loss line and appends it to the loss log.
    fn print_current_losses(
        &mut self,
        epoch: usize,
        iters: usize,
        losses: &LossRecord,
        t_comp: f64,
        t_data: f64,
    ) -> Result<(), TrainError>;

    /// `counter_ratio` is the progress through the current epoch, in [0, 1].
    fn plot_current_losses(
        &mut self,
        epoch: usize,
        counter_ratio: f64,
        losses: &LossRecord,
    ) -> Result<(), TrainError>;

    fn plot_current_eval(&mut self, eval: &BTreeMap<String, f64>) -> Result<(), TrainError>;

    fn display_current_results(
        &mut self,
        visuals: &[(String, DynamicImage)],
    ) -> Result<(), TrainError>;

    fn finish(&mut self) -> Result<(), TrainError>;
}

/// `(epoch: 3, iters: 400, time: 0.052, data: 0.001) G_GAN: 0.812 ...`
pub fn format_losses(
    epoch: usize,
    iters: usize,
    losses: &LossRecord,
    t_comp: f64,
    t_data: f64,
) -> String {
    let mut message = format!("(epoch: {epoch}, iters: {iters}, time: {t_comp:.3}, data: {t_data:.3}) ");
    for (name, value) in losses.iter() {
        message.push_str(&format!("{name}: {value:.3} "));
    }
    message
}

/// Logs a failed logger call instead of propagating it.
pub fn best_effort(result: Result<(), TrainError>, what: &str) {
    if let Err(err) = result {
        log::warn!("Failed to log {what}: {err}");
    }
}

/// File-backed tracker living in the experiment directory.
///
/// - `loss_log.txt`: append-only loss lines under a timestamped header
/// - `run.json`: run name and resolved options
/// - `metrics.jsonl`: one JSON record per `plot_*`/`display_*` call
/// - `images/`: PNGs referenced by the `images` records
pub struct RunLogger {
    loss_log: PathBuf,
    metrics: File,
    image_dir: PathBuf,
    step: usize,
}

impl RunLogger {
    pub fn create(config: &TrainingConfig) -> Result<Self, TrainError> {
        Self::in_dir(&config.experiment_dir(), config)
    }

    pub fn in_dir(dir: &Path, config: &TrainingConfig) -> Result<Self, TrainError> {
        let image_dir = dir.join("images");
        fs::create_dir_all(&image_dir)?;

        let run = json!({
            "project": PROJECT,
            "name": config.run_name(),
            "config": serde_json::to_value(config)?,
        });
        fs::write(dir.join("run.json"), serde_json::to_string_pretty(&run)?)?;

        let loss_log = dir.join("loss_log.txt");
        let mut log_file = OpenOptions::new().create(true).append(true).open(&loss_log)?;
        let now = chrono::Local::now().format("%c");
        writeln!(log_file, "================ Training Loss ({now}) ================")?;

        let metrics = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("metrics.jsonl"))?;

        log::info!("Logging run `{}` to {}", config.run_name(), dir.display());
        Ok(Self {
            loss_log,
            metrics,
            image_dir,
            step: 0,
        })
    }

    fn record(&mut self, value: Value) -> Result<(), TrainError> {
        serde_json::to_writer(&mut self.metrics, &value)?;
        self.metrics.write_all(b"\n")?;
        self.step += 1;
        Ok(())
    }
}

impl ExperimentLogger for RunLogger {
    fn print_current_losses(
        &mut self,
        epoch: usize,
        iters: usize,
        losses: &LossRecord,
        t_comp: f64,
        t_data: f64,
    ) -> Result<(), TrainError> {
        let message = format_losses(epoch, iters, losses, t_comp, t_data);
        log::info!("{message}");
        let mut log_file = OpenOptions::new().append(true).open(&self.loss_log)?;
        writeln!(log_file, "{message}")?;
        Ok(())
    }

    fn plot_current_losses(
        &mut self,
        epoch: usize,
        counter_ratio: f64,
        losses: &LossRecord,
    ) -> Result<(), TrainError> {
        if losses.is_empty() {
            return Ok(());
        }
        let train: serde_json::Map<String, Value> = losses
            .iter()
            .map(|(name, value)| (name.to_string(), json!(value)))
            .collect();
        self.record(json!({
            "train": train,
            "meta": { "epoch": epoch, "counter_ratio": counter_ratio },
        }))
    }

    fn plot_current_eval(&mut self, eval: &BTreeMap<String, f64>) -> Result<(), TrainError> {
        if eval.is_empty() {
            return Ok(());
        }
        self.record(json!({ "eval": eval }))
    }

    fn display_current_results(
        &mut self,
        visuals: &[(String, DynamicImage)],
    ) -> Result<(), TrainError> {
        let mut images = Vec::with_capacity(visuals.len());
        for (label, image) in visuals {
            let path = self.image_dir.join(format!("{:06}_{label}.png", self.step));
            image.save(&path)?;
            images.push(json!({ "caption": label, "path": path }));
        }
        self.record(json!({ "images": images }))
    }

    fn finish(&mut self) -> Result<(), TrainError> {
        self.record(json!({ "finished": true }))?;
        self.metrics.flush()?;
        Ok(())
    }
}

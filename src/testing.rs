//! Test doubles for the training loop and evaluation pass.

use std::cell::RefCell;
use std::collections::BTreeMap;

use burn::backend::NdArray;
use burn::prelude::*;
use image::DynamicImage;

use crate::error::TrainError;
use crate::eval::EvalLog;
use crate::logger::ExperimentLogger;
use crate::model::data::BatchSource;
use crate::model::{
    CheckpointSuffix, FAKE_B, LossRecord, Phase, REAL_A, REAL_B, TranslationModel, Visuals,
};

pub type TestBackend = NdArray<f32>;

/// Model whose batches are plain sample indices.
#[derive(Debug)]
pub struct MockModel {
    pub phase: Phase,
    pub input: Option<usize>,
    pub optimize_calls: usize,
    pub tests_run: usize,
    pub lr_updates: usize,
    pub saved: RefCell<Vec<String>>,
    pub fail_test_at: Option<usize>,
    pub fail_optimize_at: Option<usize>,
    pub channels: usize,
}

impl Default for MockModel {
    fn default() -> Self {
        Self {
            phase: Phase::Train,
            input: None,
            optimize_calls: 0,
            tests_run: 0,
            lr_updates: 0,
            saved: RefCell::new(Vec::new()),
            fail_test_at: None,
            fail_optimize_at: None,
            channels: 3,
        }
    }
}

impl TranslationModel for MockModel {
    type Batch = usize;
    type Backend = TestBackend;

    fn set_input(&mut self, batch: usize) {
        self.input = Some(batch);
    }

    fn optimize_parameters(&mut self) -> Result<(), TrainError> {
        let index = self.input.ok_or(TrainError::MissingInput)?;
        if self.fail_optimize_at == Some(index) {
            return Err(TrainError::NonFiniteLoss {
                name: "G_GAN".into(),
                value: f64::NAN,
            });
        }
        self.optimize_calls += 1;
        Ok(())
    }

    fn test(&mut self) -> Result<(), TrainError> {
        let index = self.input.ok_or(TrainError::MissingInput)?;
        if self.fail_test_at == Some(index) {
            return Err(TrainError::MissingVisual(FAKE_B.into()));
        }
        self.tests_run += 1;
        Ok(())
    }

    fn current_visuals(&self) -> Result<Visuals<TestBackend>, TrainError> {
        let index = self.input.ok_or(TrainError::MissingInput)?;
        let device = Default::default();
        let value = index as f32 / 10.0 - 0.5;
        let shape = [1, self.channels, 8, 8];
        Ok(Visuals::default()
            .with(REAL_A, Tensor::zeros(shape, &device))
            .with(FAKE_B, Tensor::full(shape, value * 0.5, &device))
            .with(REAL_B, Tensor::full(shape, value, &device)))
    }

    fn current_losses(&self) -> LossRecord {
        let mut losses = LossRecord::default();
        losses.push("G_GAN", 0.5);
        losses.push("G_L1", 1.25);
        losses.push("D_real", 0.25);
        losses.push("D_fake", 0.75);
        losses
    }

    fn update_learning_rate(&mut self) -> f64 {
        self.lr_updates += 1;
        1.0
    }

    fn save_networks(&self, suffix: &CheckpointSuffix) -> Result<(), TrainError> {
        self.saved.borrow_mut().push(suffix.to_string());
        Ok(())
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn phase(&self) -> Phase {
        self.phase
    }
}

/// Yields `batch_size`-sized index batches over `len` samples; each batch
/// is represented by its first index.
pub struct VecSource {
    pub len: usize,
    pub batch_size: usize,
    pub pulled: usize,
}

impl VecSource {
    pub fn new(len: usize, batch_size: usize) -> Self {
        Self {
            len,
            batch_size,
            pulled: 0,
        }
    }
}

impl BatchSource for VecSource {
    type Batch = usize;

    fn num_items(&self) -> usize {
        self.len
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<usize, TrainError>> + '_> {
        let step = self.batch_size;
        let pulled = &mut self.pulled;
        Box::new((0..self.len).step_by(step).map(move |index| {
            *pulled += 1;
            Ok(index)
        }))
    }
}

#[derive(Debug, Default)]
pub struct MockLogger {
    pub lines: Vec<String>,
    pub plotted: Vec<(usize, f64)>,
    pub evals: Vec<EvalLog>,
    pub displayed: Vec<Vec<String>>,
}

impl ExperimentLogger for MockLogger {
    fn print_current_losses(
        &mut self,
        epoch: usize,
        iters: usize,
        losses: &LossRecord,
        t_comp: f64,
        t_data: f64,
    ) -> Result<(), TrainError> {
        self.lines.push(crate::logger::format_losses(
            epoch, iters, losses, t_comp, t_data,
        ));
        Ok(())
    }

    fn plot_current_losses(
        &mut self,
        epoch: usize,
        counter_ratio: f64,
        _losses: &LossRecord,
    ) -> Result<(), TrainError> {
        self.plotted.push((epoch, counter_ratio));
        Ok(())
    }

    fn plot_current_eval(&mut self, eval: &BTreeMap<String, f64>) -> Result<(), TrainError> {
        self.evals.push(eval.clone());
        Ok(())
    }

    fn display_current_results(
        &mut self,
        visuals: &[(String, DynamicImage)],
    ) -> Result<(), TrainError> {
        self.displayed
            .push(visuals.iter().map(|(label, _)| label.clone()).collect());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrainError> {
        Ok(())
    }
}

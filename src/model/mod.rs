pub mod architecture;
pub mod checkpoint;
pub mod data;
pub mod scheduler;
pub mod training;

use std::fmt;

use burn::prelude::*;
use image::DynamicImage;

use crate::error::TrainError;
use crate::utils::tensor_to_image;

pub const REAL_A: &str = "real_A";
pub const FAKE_B: &str = "fake_B";
pub const REAL_B: &str = "real_B";

/// Whether the model is optimising or running inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Eval,
}

/// Image tensors produced by the last forward pass, keyed by label and kept
/// in insertion order.
#[derive(Debug, Clone)]
pub struct Visuals<B: Backend> {
    entries: Vec<(String, Tensor<B, 4>)>,
}

impl<B: Backend> Default for Visuals<B> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<B: Backend> Visuals<B> {
    pub fn with(mut self, label: &str, images: Tensor<B, 4>) -> Self {
        self.entries.push((label.to_string(), images));
        self
    }

    pub fn get(&self, label: &str) -> Option<&Tensor<B, 4>> {
        self.entries
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, images)| images)
    }

    pub fn require(&self, label: &str) -> Result<Tensor<B, 4>, TrainError> {
        self.get(label)
            .cloned()
            .ok_or_else(|| TrainError::MissingVisual(label.to_string()))
    }

    /// Renders the first sample of every entry.
    pub fn to_images(&self) -> Result<Vec<(String, DynamicImage)>, TrainError> {
        self.entries
            .iter()
            .map(|(label, images)| Ok((label.clone(), tensor_to_image(images.clone())?)))
            .collect()
    }
}

/// Scalar losses of the last optimisation step, in reporting order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossRecord {
    entries: Vec<(String, f64)>,
}

impl LossRecord {
    pub fn push(&mut self, name: &str, value: f64) {
        self.entries.push((name.to_string(), value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Name under which networks are checkpointed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSuffix {
    Latest,
    Iter(usize),
    Epoch(usize),
    Named(String),
}

impl fmt::Display for CheckpointSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointSuffix::Latest => write!(f, "latest"),
            CheckpointSuffix::Iter(iters) => write!(f, "iter_{iters}"),
            CheckpointSuffix::Epoch(epoch) => write!(f, "{epoch}"),
            CheckpointSuffix::Named(name) => write!(f, "{name}"),
        }
    }
}

/// What the training loop and evaluation pass need from a translation model.
pub trait TranslationModel {
    type Batch;
    /// Backend the visuals are produced on.
    type Backend: Backend;

    fn set_input(&mut self, batch: Self::Batch);

    /// One forward/backward/update step on the current input.
    fn optimize_parameters(&mut self) -> Result<(), TrainError>;

    /// Forward pass without gradient tracking on the current input.
    fn test(&mut self) -> Result<(), TrainError>;

    fn current_visuals(&self) -> Result<Visuals<Self::Backend>, TrainError>;

    fn current_losses(&self) -> LossRecord;

    /// Steps the learning-rate schedule and returns the new rate.
    fn update_learning_rate(&mut self) -> f64;

    fn save_networks(&self, suffix: &CheckpointSuffix) -> Result<(), TrainError>;

    fn set_phase(&mut self, phase: Phase);

    fn phase(&self) -> Phase;
}

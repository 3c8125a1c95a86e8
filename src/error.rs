use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("interval `{name}` must be greater than zero")]
    InvalidInterval { name: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no valid image files found in {}", .0.display())]
    EmptyDataset(PathBuf),

    #[error("failed to decode sample {index} ({})", path.display())]
    Sample {
        index: usize,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("model has no input, call set_input first")]
    MissingInput,

    #[error("visual `{0}` missing from model output")]
    MissingVisual(String),

    #[error("loss {name} is not finite ({value})")]
    NonFiniteLoss { name: String, value: f64 },

    #[error("metric error: {0}")]
    Metric(String),

    #[error("tensor conversion failed: {0}")]
    Tensor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

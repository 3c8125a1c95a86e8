mod cli;
mod sweep;

use std::path::PathBuf;

use burn::config::Config;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::schedule::Schedule;

pub use cli::TrainArgs;
pub use sweep::sample_sweep;

/// Name used for the model in experiment and run names.
pub const MODEL_NAME: &str = "pix2pix";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum GeneratorArch {
    #[serde(rename = "resnet_9blocks")]
    #[value(name = "resnet_9blocks")]
    Resnet9Blocks,
    #[serde(rename = "resnet_6blocks")]
    #[value(name = "resnet_6blocks")]
    Resnet6Blocks,
    #[serde(rename = "unet_128")]
    #[value(name = "unet_128")]
    Unet128,
    #[serde(rename = "unet_256")]
    #[value(name = "unet_256")]
    Unet256,
}

impl GeneratorArch {
    pub const ALL: [GeneratorArch; 4] = [
        GeneratorArch::Resnet9Blocks,
        GeneratorArch::Resnet6Blocks,
        GeneratorArch::Unet128,
        GeneratorArch::Unet256,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GeneratorArch::Resnet9Blocks => "resnet_9blocks",
            GeneratorArch::Resnet6Blocks => "resnet_6blocks",
            GeneratorArch::Unet128 => "unet_128",
            GeneratorArch::Unet256 => "unet_256",
        }
    }

    /// Number of residual blocks, `None` for the U-Net variants.
    pub fn resnet_blocks(&self) -> Option<usize> {
        match self {
            GeneratorArch::Resnet9Blocks => Some(9),
            GeneratorArch::Resnet6Blocks => Some(6),
            GeneratorArch::Unet128 | GeneratorArch::Unet256 => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum DiscriminatorArch {
    #[serde(rename = "basic")]
    #[value(name = "basic")]
    Basic,
    #[serde(rename = "n_layers")]
    #[value(name = "n_layers")]
    NLayers,
}

impl DiscriminatorArch {
    pub fn name(&self) -> &'static str {
        match self {
            DiscriminatorArch::Basic => "basic",
            DiscriminatorArch::NLayers => "n_layers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum GanMode {
    #[serde(rename = "vanilla")]
    #[value(name = "vanilla")]
    Vanilla,
    #[serde(rename = "lsgan")]
    #[value(name = "lsgan")]
    Lsgan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum LrPolicy {
    #[serde(rename = "linear")]
    #[value(name = "linear")]
    Linear,
    #[serde(rename = "step")]
    #[value(name = "step")]
    Step,
    #[serde(rename = "cosine")]
    #[value(name = "cosine")]
    Cosine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Direction {
    #[serde(rename = "AtoB")]
    #[value(name = "AtoB")]
    AtoB,
    #[serde(rename = "BtoA")]
    #[value(name = "BtoA")]
    BtoA,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Preprocess {
    #[serde(rename = "resize_and_crop")]
    #[value(name = "resize_and_crop")]
    ResizeAndCrop,
    #[serde(rename = "crop")]
    #[value(name = "crop")]
    Crop,
    #[serde(rename = "resize")]
    #[value(name = "resize")]
    Resize,
}

impl Preprocess {
    pub fn name(&self) -> &'static str {
        match self {
            Preprocess::ResizeAndCrop => "resize_and_crop",
            Preprocess::Crop => "crop",
            Preprocess::Resize => "resize",
        }
    }
}

/// Fully resolved training options. Built once (from the command line or a
/// saved `train_opt.json`) and never mutated after sweep resolution.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub dataroot: String,
    pub name: String,
    pub checkpoints_dir: String,

    #[config(default = 1)]
    pub epoch_count: usize,
    #[config(default = 100)]
    pub n_epochs: usize,
    #[config(default = 100)]
    pub n_epochs_decay: usize,
    #[config(default = 1)]
    pub batch_size: usize,

    #[config(default = 100)]
    pub print_freq: usize,
    #[config(default = 400)]
    pub display_freq: usize,
    #[config(default = 5000)]
    pub save_latest_freq: usize,
    #[config(default = 5)]
    pub save_epoch_freq: usize,
    #[config(default = false)]
    pub save_by_iter: bool,
    #[config(default = 1)]
    pub display_id: usize,

    /// Upper bound on evaluation samples, the whole eval split when unset.
    pub num_test: Option<usize>,

    #[config(default = 3)]
    pub input_nc: usize,
    #[config(default = 3)]
    pub output_nc: usize,

    #[config(default = "-1")]
    pub job_id: i64,

    #[config(default = 286)]
    pub load_size: usize,
    #[config(default = 256)]
    pub crop_size: usize,
    #[config(default = "Preprocess::ResizeAndCrop")]
    pub preprocess: Preprocess,
    #[config(default = "Direction::AtoB")]
    pub direction: Direction,
    #[config(default = false)]
    pub no_flip: bool,
    #[config(default = false)]
    pub serial_batches: bool,

    #[config(default = "GeneratorArch::Unet256")]
    pub net_g: GeneratorArch,
    #[config(default = 8)]
    pub n_downsampling: usize,
    #[config(default = 64)]
    pub ngf: usize,
    #[config(default = "DiscriminatorArch::Basic")]
    pub net_d: DiscriminatorArch,
    #[config(default = 3)]
    pub n_layers_d: usize,
    #[config(default = 64)]
    pub ndf: usize,

    #[config(default = "GanMode::Vanilla")]
    pub gan_mode: GanMode,
    #[config(default = 0.0)]
    pub lambda_identity: f64,
    #[config(default = 100.0)]
    pub lambda_a: f64,
    #[config(default = 10.0)]
    pub lambda_b: f64,

    #[config(default = 2e-4)]
    pub lr: f64,
    #[config(default = 0.5)]
    pub beta1: f64,
    #[config(default = "LrPolicy::Linear")]
    pub lr_policy: LrPolicy,
    #[config(default = 50)]
    pub lr_decay_iters: usize,

    #[config(default = false)]
    pub continue_train: bool,
    pub load_suffix: Option<String>,

    /// Side of the pooled grid used by the evaluation feature extractor.
    #[config(default = 8)]
    pub fid_pool_size: usize,

    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// Applies sweep sampling and validates the result. The returned config is
    /// what every component is built from.
    pub fn resolve(self) -> Result<Self, TrainError> {
        let config = sample_sweep(self);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrainError> {
        Schedule::from_config(self)?;

        if self.batch_size == 0 {
            return Err(invalid("batch_size must be greater than zero"));
        }
        if self.n_epochs + self.n_epochs_decay < self.epoch_count {
            return Err(invalid(format!(
                "epoch_count {} is past the last epoch {}",
                self.epoch_count,
                self.n_epochs + self.n_epochs_decay
            )));
        }
        for (name, channels) in [("input_nc", self.input_nc), ("output_nc", self.output_nc)] {
            if channels != 1 && channels != 3 {
                return Err(invalid(format!("{name} must be 1 or 3, got {channels}")));
            }
        }
        if self.preprocess == Preprocess::ResizeAndCrop && self.crop_size > self.load_size {
            return Err(invalid(format!(
                "crop_size {} is larger than load_size {}",
                self.crop_size, self.load_size
            )));
        }
        if self.n_downsampling == 0 || self.n_downsampling >= usize::BITS as usize {
            return Err(invalid("n_downsampling must be positive"));
        }
        if self.crop_size % (1usize << self.n_downsampling) != 0 {
            return Err(invalid(format!(
                "crop_size {} is not divisible by 2^{} for {}",
                self.crop_size,
                self.n_downsampling,
                self.net_g.name()
            )));
        }
        if self.net_d == DiscriminatorArch::NLayers && self.n_layers_d == 0 {
            return Err(invalid("n_layers_d must be positive"));
        }
        // Two stride-1 4x4 convs follow the stride-2 layers and each trims a pixel.
        let patch_side = u32::try_from(self.discriminator_layers())
            .ok()
            .and_then(|layers| self.crop_size.checked_shr(layers))
            .unwrap_or(0);
        if patch_side < 3 {
            return Err(invalid(format!(
                "crop_size {} is too small for a {}-layer discriminator",
                self.crop_size,
                self.discriminator_layers()
            )));
        }
        if self.ngf == 0 || self.ndf == 0 || self.fid_pool_size == 0 {
            return Err(invalid("ngf, ndf and fid_pool_size must be positive"));
        }
        if self.lr_policy == LrPolicy::Step && self.lr_decay_iters == 0 {
            return Err(invalid("lr_decay_iters must be positive for the step policy"));
        }
        Ok(())
    }

    /// Number of discriminator layers once `basic` is expanded.
    pub fn discriminator_layers(&self) -> usize {
        match self.net_d {
            DiscriminatorArch::Basic => 3,
            DiscriminatorArch::NLayers => self.n_layers_d,
        }
    }

    pub fn last_epoch(&self) -> usize {
        self.n_epochs + self.n_epochs_decay
    }

    /// Directory name of the experiment, decorated with the architecture
    /// choices so sweep members never collide.
    pub fn experiment_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}_{}_{}",
            self.name,
            MODEL_NAME,
            self.net_g.name(),
            self.net_d.name(),
            self.n_layers_d,
            self.load_size,
            self.crop_size,
            self.preprocess.name()
        )
    }

    pub fn experiment_dir(&self) -> PathBuf {
        PathBuf::from(&self.checkpoints_dir).join(self.experiment_name())
    }

    /// Run name reported to the experiment tracker.
    pub fn run_name(&self) -> String {
        format!(
            "experiment_{}_{}_{}_{}_{}_{}_{}_{}",
            MODEL_NAME,
            self.net_g.name(),
            self.net_d.name(),
            self.dataroot,
            self.preprocess.name(),
            self.load_size,
            self.crop_size,
            self.no_flip
        )
    }
}

fn invalid(message: impl Into<String>) -> TrainError {
    TrainError::InvalidConfig(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrainingConfig {
        TrainingConfig::new("./datasets/facades".into(), "facades".into(), "./checkpoints".into())
    }

    #[test]
    fn defaults_validate() {
        config().validate().unwrap();
    }

    #[test]
    fn experiment_name_is_decorated() {
        assert_eq!(
            config().experiment_name(),
            "facades_pix2pix_unet_256_basic_3_286_256_resize_and_crop"
        );
        assert_eq!(
            config().experiment_dir(),
            PathBuf::from("./checkpoints/facades_pix2pix_unet_256_basic_3_286_256_resize_and_crop")
        );
    }

    #[test]
    fn rejects_zero_frequencies() {
        let err = config().with_print_freq(0).validate().unwrap_err();
        assert!(matches!(err, TrainError::InvalidInterval { name: "print_freq" }));
    }

    #[test]
    fn rejects_indivisible_crop() {
        let err = config()
            .with_net_g(GeneratorArch::Resnet9Blocks)
            .with_n_downsampling(3)
            .with_crop_size(100)
            .with_load_size(128)
            .validate()
            .unwrap_err();
        assert!(matches!(err, TrainError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_crop_too_small_for_discriminator() {
        let small = config()
            .with_net_g(GeneratorArch::Resnet6Blocks)
            .with_n_downsampling(2)
            .with_crop_size(16)
            .with_load_size(16);
        let err = small.clone().validate().unwrap_err();
        assert!(err.to_string().contains("discriminator"), "{err}");

        small
            .clone()
            .with_net_d(DiscriminatorArch::NLayers)
            .with_n_layers_d(2)
            .validate()
            .unwrap();
        small.with_crop_size(24).with_load_size(24).validate().unwrap();
    }

    #[test]
    fn rejects_unsupported_channels() {
        let err = config().with_input_nc(2).validate().unwrap_err();
        assert!(err.to_string().contains("input_nc"));
    }

    #[test]
    fn basic_discriminator_has_three_layers() {
        let config = config().with_n_layers_d(5);
        assert_eq!(config.discriminator_layers(), 3);
        let config = config.with_net_d(DiscriminatorArch::NLayers);
        assert_eq!(config.discriminator_layers(), 5);
    }

    #[test]
    fn saved_config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_opt.json");
        let original = config()
            .with_net_g(GeneratorArch::Resnet6Blocks)
            .with_num_test(Some(7));
        original.save(&path).unwrap();

        let loaded = TrainingConfig::load(&path).unwrap();
        assert_eq!(loaded.net_g, GeneratorArch::Resnet6Blocks);
        assert_eq!(loaded.num_test, Some(7));
        assert_eq!(loaded.experiment_name(), original.experiment_name());
    }
}

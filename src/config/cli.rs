use std::path::PathBuf;

use burn::config::Config;
use clap::Parser;

use super::{
    DiscriminatorArch, Direction, GanMode, GeneratorArch, LrPolicy, Preprocess, TrainingConfig,
};
use crate::error::TrainError;

/// Train a pix2pix image-to-image translation model
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
pub struct TrainArgs {
    /// Load every option from a saved train_opt.json instead of the flags below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Disable the experiment logger
    #[arg(long)]
    pub no_log: bool,

    /// Dataset root, holding train/ and val/ folders of aligned A|B images
    #[arg(long, required_unless_present = "config")]
    pub dataroot: Option<String>,

    /// Experiment name
    #[arg(long, default_value = "experiment_name")]
    pub name: String,

    /// Where checkpoints and logs are written
    #[arg(long, default_value = "./checkpoints")]
    pub checkpoints_dir: String,

    /// Starting epoch, used when resuming
    #[arg(long, default_value = "1")]
    pub epoch_count: usize,

    /// Epochs at the initial learning rate
    #[arg(long, default_value = "100")]
    pub n_epochs: usize,

    /// Epochs to linearly decay the learning rate to zero
    #[arg(long, default_value = "100")]
    pub n_epochs_decay: usize,

    #[arg(long, default_value = "1")]
    pub batch_size: usize,

    /// Log training losses every print_freq iterations
    #[arg(long, default_value = "100")]
    pub print_freq: usize,

    /// Evaluate and display results every display_freq iterations
    #[arg(long, default_value = "400")]
    pub display_freq: usize,

    /// Save the latest checkpoint every save_latest_freq iterations
    #[arg(long, default_value = "5000")]
    pub save_latest_freq: usize,

    /// Save a checkpoint every save_epoch_freq epochs
    #[arg(long, default_value = "5")]
    pub save_epoch_freq: usize,

    /// Name latest checkpoints iter_<N> instead of latest
    #[arg(long)]
    pub save_by_iter: bool,

    /// Losses are also plotted to the tracker when greater than zero
    #[arg(long, default_value = "1")]
    pub display_id: usize,

    /// Maximum number of evaluation samples (defaults to the whole eval split)
    #[arg(long)]
    pub num_test: Option<usize>,

    #[arg(long, default_value = "3")]
    pub input_nc: usize,

    #[arg(long, default_value = "3")]
    pub output_nc: usize,

    /// Sweep member id, -1 disables hyper-parameter sampling
    #[arg(long, default_value = "-1", allow_negative_numbers = true)]
    pub job_id: i64,

    #[arg(long, default_value = "286")]
    pub load_size: usize,

    #[arg(long, default_value = "256")]
    pub crop_size: usize,

    #[arg(long, value_enum, default_value_t = Preprocess::ResizeAndCrop)]
    pub preprocess: Preprocess,

    #[arg(long, value_enum, default_value_t = Direction::AtoB)]
    pub direction: Direction,

    /// Do not flip images for augmentation
    #[arg(long)]
    pub no_flip: bool,

    /// Take batches in order instead of shuffling
    #[arg(long)]
    pub serial_batches: bool,

    #[arg(long, value_enum, default_value_t = GeneratorArch::Unet256)]
    pub net_g: GeneratorArch,

    /// Down-sampling steps of the generator (U-Net depth for unet_*)
    #[arg(long, default_value = "8")]
    pub n_downsampling: usize,

    /// Generator filters in the last conv layer
    #[arg(long, default_value = "64")]
    pub ngf: usize,

    #[arg(long, value_enum, default_value_t = DiscriminatorArch::Basic)]
    pub net_d: DiscriminatorArch,

    /// Discriminator depth, only used with n_layers
    #[arg(long, default_value = "3")]
    pub n_layers_d: usize,

    /// Discriminator filters in the first conv layer
    #[arg(long, default_value = "64")]
    pub ndf: usize,

    #[arg(long, value_enum, default_value_t = GanMode::Vanilla)]
    pub gan_mode: GanMode,

    /// Weight of the identity term, relative to lambda_a
    #[arg(long, default_value = "0.0")]
    pub lambda_identity: f64,

    /// Weight of the L1 reconstruction term
    #[arg(long, default_value = "100.0")]
    pub lambda_a: f64,

    #[arg(long, default_value = "10.0")]
    pub lambda_b: f64,

    /// Initial Adam learning rate
    #[arg(long, default_value = "0.0002")]
    pub lr: f64,

    /// Adam momentum term
    #[arg(long, default_value = "0.5")]
    pub beta1: f64,

    #[arg(long, value_enum, default_value_t = LrPolicy::Linear)]
    pub lr_policy: LrPolicy,

    /// Epochs between decays for the step policy
    #[arg(long, default_value = "50")]
    pub lr_decay_iters: usize,

    /// Load networks saved under load_suffix before training
    #[arg(long)]
    pub continue_train: bool,

    #[arg(long)]
    pub load_suffix: Option<String>,

    /// Grid side of the pooled features used for FID
    #[arg(long, default_value = "8")]
    pub fid_pool_size: usize,

    #[arg(long, default_value = "42")]
    pub seed: u64,
}

impl TrainArgs {
    /// Builds the resolved config: loaded from file when `--config` is given,
    /// otherwise from the flags, then swept and validated.
    pub fn into_config(self) -> Result<TrainingConfig, TrainError> {
        let config = match &self.config {
            Some(path) => TrainingConfig::load(path).map_err(|err| {
                TrainError::InvalidConfig(format!("{}: {err:?}", path.display()))
            })?,
            None => self.to_config(),
        };
        config.resolve()
    }

    fn to_config(&self) -> TrainingConfig {
        TrainingConfig {
            dataroot: self.dataroot.clone().unwrap_or_default(),
            name: self.name.clone(),
            checkpoints_dir: self.checkpoints_dir.clone(),
            epoch_count: self.epoch_count,
            n_epochs: self.n_epochs,
            n_epochs_decay: self.n_epochs_decay,
            batch_size: self.batch_size,
            print_freq: self.print_freq,
            display_freq: self.display_freq,
            save_latest_freq: self.save_latest_freq,
            save_epoch_freq: self.save_epoch_freq,
            save_by_iter: self.save_by_iter,
            display_id: self.display_id,
            num_test: self.num_test,
            input_nc: self.input_nc,
            output_nc: self.output_nc,
            job_id: self.job_id,
            load_size: self.load_size,
            crop_size: self.crop_size,
            preprocess: self.preprocess,
            direction: self.direction,
            no_flip: self.no_flip,
            serial_batches: self.serial_batches,
            net_g: self.net_g,
            n_downsampling: self.n_downsampling,
            ngf: self.ngf,
            net_d: self.net_d,
            n_layers_d: self.n_layers_d,
            ndf: self.ndf,
            gan_mode: self.gan_mode,
            lambda_identity: self.lambda_identity,
            lambda_a: self.lambda_a,
            lambda_b: self.lambda_b,
            lr: self.lr,
            beta1: self.beta1,
            lr_policy: self.lr_policy,
            lr_decay_iters: self.lr_decay_iters,
            continue_train: self.continue_train,
            load_suffix: self.load_suffix.clone(),
            fid_pool_size: self.fid_pool_size,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_config() {
        let args = TrainArgs::try_parse_from([
            "img2img_gan",
            "--dataroot",
            "./datasets/maps",
            "--name",
            "maps",
            "--net-g",
            "resnet_9blocks",
            "--n-downsampling",
            "2",
            "--direction",
            "BtoA",
            "--print-freq",
            "10",
            "--num-test",
            "25",
        ])
        .unwrap();
        let config = args.into_config().unwrap();

        assert_eq!(config.dataroot, "./datasets/maps");
        assert_eq!(config.net_g, GeneratorArch::Resnet9Blocks);
        assert_eq!(config.direction, Direction::BtoA);
        assert_eq!(config.print_freq, 10);
        assert_eq!(config.num_test, Some(25));
        assert_eq!(config.job_id, -1);
    }

    #[test]
    fn zero_frequency_fails_before_anything_is_built() {
        let args = TrainArgs::try_parse_from([
            "img2img_gan",
            "--dataroot",
            "d",
            "--display-freq",
            "0",
        ])
        .unwrap();
        assert!(matches!(
            args.into_config(),
            Err(TrainError::InvalidInterval { name: "display_freq" })
        ));
    }

    #[test]
    fn negative_job_id_parses() {
        let args =
            TrainArgs::try_parse_from(["img2img_gan", "--dataroot", "d", "--job-id", "-1"]).unwrap();
        assert_eq!(args.job_id, -1);
    }

    #[test]
    fn saved_config_replaces_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_opt.json");
        TrainingConfig::new("saved_root".into(), "saved".into(), "ckpt".into())
            .with_batch_size(4)
            .save(&path)
            .unwrap();

        let args = TrainArgs::try_parse_from([
            "img2img_gan",
            "--config",
            path.to_str().unwrap(),
        ])
        .unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.dataroot, "saved_root");
        assert_eq!(config.batch_size, 4);
    }
}

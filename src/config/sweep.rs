use log::info;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{GeneratorArch, Preprocess, TrainingConfig};

/// Resolves sweep mode. With `job_id == -1` the config is returned untouched,
/// otherwise the architecture knobs are sampled from an RNG seeded by
/// `seed` and `job_id`, so re-running a sweep member reproduces its config.
pub fn sample_sweep(config: TrainingConfig) -> TrainingConfig {
    if config.job_id == -1 {
        return config;
    }
    let mut rng = StdRng::seed_from_u64(config.seed ^ (config.job_id as u64).rotate_left(32));
    let config = sample_sweep_with(config, &mut rng);
    info!(
        "sweep job {}: netG={} n_downsampling={} load_size={} crop_size={} lambda_identity={} lambda_A={} lambda_B={}",
        config.job_id,
        config.net_g.name(),
        config.n_downsampling,
        config.load_size,
        config.crop_size,
        config.lambda_identity,
        config.lambda_a,
        config.lambda_b
    );
    config
}

pub fn sample_sweep_with<R: Rng + ?Sized>(mut config: TrainingConfig, rng: &mut R) -> TrainingConfig {
    config.load_size = pick(rng, &[512, 256]);
    config.crop_size = pick(rng, &[128, 64]);
    config.serial_batches = false;
    config.preprocess = Preprocess::ResizeAndCrop;
    config.net_g = pick(rng, &GeneratorArch::ALL);

    match config.net_g {
        GeneratorArch::Resnet9Blocks | GeneratorArch::Resnet6Blocks => {
            config.n_downsampling = pick(rng, &[2, 3, 4]);
        }
        GeneratorArch::Unet128 | GeneratorArch::Unet256 => {
            config.crop_size = if config.net_g == GeneratorArch::Unet128 { 128 } else { 256 };
            let crop_log = config.crop_size.ilog2() as usize;
            config.n_downsampling = pick(rng, &[crop_log, crop_log - 1, crop_log - 2]);
        }
    }

    config.batch_size = 1;
    config.lambda_identity = pick(rng, &[0.25, 0.5, 1.0]);
    config.lambda_a = pick(rng, &[5.0, 10.0, 15.0]);
    config.lambda_b = pick(rng, &[5.0, 10.0, 15.0]);
    config
}

fn pick<T: Copy, R: Rng + ?Sized>(rng: &mut R, choices: &[T]) -> T {
    choices[rng.gen_range(0..choices.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TrainingConfig {
        TrainingConfig::new("data".into(), "sweep".into(), "ckpt".into())
    }

    #[test]
    fn disabled_sweep_keeps_config() {
        let config = sample_sweep(base().with_batch_size(8));
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.net_g, GeneratorArch::Unet256);
        assert_eq!(config.load_size, 286);
    }

    #[test]
    fn sampled_configs_respect_architecture_rules() {
        for job_id in 0..64 {
            let config = sample_sweep(base().with_job_id(job_id));

            assert_eq!(config.batch_size, 1);
            assert!(!config.serial_batches);
            assert_eq!(config.preprocess, Preprocess::ResizeAndCrop);
            assert!([512, 256].contains(&config.load_size));
            assert!([0.25, 0.5, 1.0].contains(&config.lambda_identity));
            assert!([5.0, 10.0, 15.0].contains(&config.lambda_a));
            assert!([5.0, 10.0, 15.0].contains(&config.lambda_b));

            match config.net_g {
                GeneratorArch::Resnet9Blocks | GeneratorArch::Resnet6Blocks => {
                    assert!([128, 64].contains(&config.crop_size));
                    assert!((2..=4).contains(&config.n_downsampling));
                }
                GeneratorArch::Unet128 => {
                    assert_eq!(config.crop_size, 128);
                    assert!((5..=7).contains(&config.n_downsampling));
                }
                GeneratorArch::Unet256 => {
                    assert_eq!(config.crop_size, 256);
                    assert!((6..=8).contains(&config.n_downsampling));
                }
            }
            config.validate().unwrap();
        }
    }

    #[test]
    fn sweep_member_is_reproducible() {
        let first = sample_sweep(base().with_job_id(3));
        let second = sample_sweep(base().with_job_id(3));
        assert_eq!(first.experiment_name(), second.experiment_name());
        assert_eq!(first.lambda_a, second.lambda_a);
        assert_eq!(first.n_downsampling, second.n_downsampling);
    }
}

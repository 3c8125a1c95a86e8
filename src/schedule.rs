use std::num::NonZeroUsize;

use crate::config::TrainingConfig;
use crate::error::TrainError;

/// How often a periodic action fires, in units of the counter it is checked
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval(NonZeroUsize);

impl Interval {
    pub fn new(name: &'static str, every: usize) -> Result<Self, TrainError> {
        NonZeroUsize::new(every)
            .map(Self)
            .ok_or(TrainError::InvalidInterval { name })
    }

    /// Fires whenever the counter is a multiple of the interval, including 0.
    pub fn fires(&self, counter: usize) -> bool {
        counter % self.0.get() == 0
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DueActions {
    pub evaluate: bool,
    pub print: bool,
    pub save_latest: bool,
}

/// Cadence of every periodic action in the training loop. Step intervals are
/// checked against `total_iters`, `save_epoch` against the epoch number.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub display: Interval,
    pub print: Interval,
    pub save_latest: Interval,
    pub save_epoch: Interval,
}

impl Schedule {
    pub fn from_config(config: &TrainingConfig) -> Result<Self, TrainError> {
        Ok(Self {
            display: Interval::new("display_freq", config.display_freq)?,
            print: Interval::new("print_freq", config.print_freq)?,
            save_latest: Interval::new("save_latest_freq", config.save_latest_freq)?,
            save_epoch: Interval::new("save_epoch_freq", config.save_epoch_freq)?,
        })
    }

    pub fn due(&self, total_iters: usize) -> DueActions {
        DueActions {
            evaluate: self.display.fires(total_iters),
            print: self.print.fires(total_iters),
            save_latest: self.save_latest.fires(total_iters),
        }
    }

    pub fn save_epoch_due(&self, epoch: usize) -> bool {
        self.save_epoch.fires(epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_is_rejected() {
        let err = Interval::new("print_freq", 0).unwrap_err();
        assert!(matches!(err, TrainError::InvalidInterval { name: "print_freq" }));
    }

    #[test]
    fn fires_exactly_on_multiples() {
        for every in 1..=7 {
            let interval = Interval::new("test", every).unwrap();
            for counter in 0..=50 {
                assert_eq!(interval.fires(counter), counter % every == 0);
            }
            assert!(interval.fires(0));
        }
    }

    #[test]
    fn save_latest_every_five_over_twelve_iterations() {
        let config = TrainingConfig::new("data".into(), "exp".into(), "ckpt".into())
            .with_save_latest_freq(5);
        let schedule = Schedule::from_config(&config).unwrap();
        let fired: Vec<usize> = (1..=12)
            .filter(|iters| schedule.due(*iters).save_latest)
            .collect();
        assert_eq!(fired, vec![5, 10]);
    }

    #[test]
    fn cadences_are_independent() {
        let config = TrainingConfig::new("data".into(), "exp".into(), "ckpt".into())
            .with_display_freq(4)
            .with_print_freq(3)
            .with_save_latest_freq(6);
        let schedule = Schedule::from_config(&config).unwrap();

        assert_eq!(
            schedule.due(12),
            DueActions {
                evaluate: true,
                print: true,
                save_latest: true
            }
        );
        assert_eq!(
            schedule.due(9),
            DueActions {
                evaluate: false,
                print: true,
                save_latest: false
            }
        );
        assert_eq!(schedule.due(7), DueActions::default());
    }

    #[test]
    fn invalid_config_interval_names_the_option() {
        let config = TrainingConfig::new("data".into(), "exp".into(), "ckpt".into())
            .with_save_epoch_freq(0);
        let err = Schedule::from_config(&config).unwrap_err();
        assert_eq!(err.to_string(), "interval `save_epoch_freq` must be greater than zero");
    }
}

use serde::{Deserialize, Serialize};

/// Scheduler selection as written in a training config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SchedulerKind {
    #[default]
    Constant,
    Step { step_size: usize, gamma: f64 },
    Exponential { gamma: f64 },
    Cosine { eta_min: f64 },
}

/// Per-epoch learning rate schedule of one greedy stage
#[derive(Debug, Clone)]
pub enum LearningRateScheduler {
    Constant { lr: f64 },
    /// Multiply by gamma every step_size epochs
    Step { lr: f64, step_size: usize, gamma: f64 },
    /// lr * gamma^epoch
    Exponential { lr: f64, gamma: f64 },
    /// Cosine annealing from lr down to eta_min over t_max epochs
    Cosine { lr: f64, t_max: usize, eta_min: f64 },
}

impl LearningRateScheduler {
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    pub fn step(lr: f64, step_size: usize, gamma: f64) -> Self {
        Self::Step {
            lr,
            step_size: step_size.max(1),
            gamma,
        }
    }

    pub fn exponential(lr: f64, gamma: f64) -> Self {
        Self::Exponential { lr, gamma }
    }

    pub fn cosine(lr: f64, t_max: usize, eta_min: f64) -> Self {
        Self::Cosine { lr, t_max, eta_min }
    }

    /// Build the schedule for a stage of `epochs` epochs
    pub fn from_kind(kind: &SchedulerKind, lr: f64, epochs: usize) -> Self {
        match *kind {
            SchedulerKind::Constant => Self::constant(lr),
            SchedulerKind::Step { step_size, gamma } => Self::step(lr, step_size, gamma),
            SchedulerKind::Exponential { gamma } => Self::exponential(lr, gamma),
            SchedulerKind::Cosine { eta_min } => Self::cosine(lr, epochs, eta_min),
        }
    }

    /// Learning rate for a zero-based epoch within the stage
    pub fn get_lr(&self, epoch: usize) -> f64 {
        match *self {
            Self::Constant { lr } => lr,
            Self::Step { lr, step_size, gamma } => {
                let num_steps = epoch / step_size;
                lr * gamma.powi(num_steps as i32)
            }
            Self::Exponential { lr, gamma } => lr * gamma.powi(epoch as i32),
            Self::Cosine { lr, t_max, eta_min } => {
                if epoch >= t_max {
                    eta_min
                } else {
                    let progress = epoch as f64 / t_max as f64;
                    eta_min + (lr - eta_min) * (1.0 + (std::f64::consts::PI * progress).cos()) / 2.0
                }
            }
        }
    }
}

impl Default for LearningRateScheduler {
    fn default() -> Self {
        Self::constant(1e-3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_schedules() {
        let constant = LearningRateScheduler::constant(0.02);
        assert_eq!(constant.get_lr(7), 0.02);

        let step = LearningRateScheduler::step(0.08, 3, 0.5);
        let rates: Vec<f64> = (0..7).map(|epoch| step.get_lr(epoch)).collect();
        assert_eq!(rates, vec![0.08, 0.08, 0.08, 0.04, 0.04, 0.04, 0.02]);

        let exponential = LearningRateScheduler::exponential(0.1, 0.5);
        assert_eq!(exponential.get_lr(3), 0.0125);
    }

    #[test]
    fn test_cosine_anneals_to_floor() {
        let scheduler = LearningRateScheduler::cosine(0.01, 4, 0.002);
        assert!((scheduler.get_lr(0) - 0.01).abs() < 1e-12);
        assert!((scheduler.get_lr(2) - 0.006).abs() < 1e-12);
        assert!(scheduler.get_lr(3) < scheduler.get_lr(2));
        assert_eq!(scheduler.get_lr(4), 0.002);
        assert_eq!(scheduler.get_lr(9), 0.002);
    }

    #[test]
    fn test_zero_step_size_is_clamped() {
        let scheduler = LearningRateScheduler::step(0.01, 0, 0.1);
        assert!((scheduler.get_lr(1) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_kind_from_json() {
        let kind: SchedulerKind =
            serde_json::from_str(r#"{"kind": "step", "step_size": 2, "gamma": 0.5}"#).unwrap();
        let scheduler = LearningRateScheduler::from_kind(&kind, 0.01, 10);
        assert_eq!(scheduler.get_lr(2), 0.005);

        let cosine = LearningRateScheduler::from_kind(&SchedulerKind::Cosine { eta_min: 0.0 }, 0.01, 4);
        assert_eq!(cosine.get_lr(4), 0.0);
    }
}

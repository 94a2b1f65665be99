// ============================================================
// Layer 3: Learning-Rate Schedule
// ============================================================
// The rate is updated once per epoch, after the training pass:
//
//   1. an explicit `epoch → rate` entry for the upcoming epoch wins
//   2. otherwise the rate decays linearly by
//        (min_lr - start_lr) / saturate
//      so it reaches min_lr after `saturate` epochs
//   3. the result is never allowed below min_lr

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::hyperparams::{strip_braces, ConfigError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrSchedule {
    pub start_lr: f64,
    pub min_lr:   f64,
    pub saturate: usize,
    pub explicit: BTreeMap<usize, f64>,
}

impl LrSchedule {
    pub fn new(start_lr: f64, min_lr: f64, saturate: usize, explicit: BTreeMap<usize, f64>) -> Self {
        Self { start_lr, min_lr, saturate, explicit }
    }

    /// Rate used for the first epoch.
    pub fn initial(&self) -> f64 {
        let lr = self.explicit.get(&1).copied().unwrap_or(self.start_lr);
        lr.max(self.min_lr)
    }

    /// Rate for `next_epoch`, given the rate used for the epoch that just
    /// finished training.
    pub fn next(&self, current: f64, next_epoch: usize) -> f64 {
        let lr = match self.explicit.get(&next_epoch) {
            Some(&rate) => rate,
            None => current + (self.min_lr - self.start_lr) / self.saturate.max(1) as f64,
        };
        lr.max(self.min_lr)
    }
}

/// Parse `--schedule`.
///
/// Accepts `5=0.004,6=0.001` and the braced form `{[5]=0.004, [6]=0.001}`.
/// An empty string yields an empty schedule.
pub fn parse_schedule(raw: &str) -> Result<BTreeMap<usize, f64>, ConfigError> {
    let mut schedule = BTreeMap::new();

    for entry in strip_braces(raw).split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let invalid = || ConfigError::InvalidSchedule(entry.to_string());

        let (epoch, rate) = entry.split_once('=').ok_or_else(invalid)?;
        let epoch = epoch
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim()
            .parse::<usize>()
            .map_err(|_| invalid())?;
        let rate = rate.trim().parse::<f64>().map_err(|_| invalid())?;

        if epoch == 0 || !rate.is_finite() || rate <= 0.0 {
            return Err(invalid());
        }
        schedule.insert(epoch, rate);
    }

    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_parse_plain_and_braced_forms() {
        let plain  = parse_schedule("5=0.004,6=0.001").unwrap();
        let braced = parse_schedule("{[5] = 0.004, [6] = 0.001}").unwrap();
        assert_eq!(plain, braced);
        assert_eq!(plain.get(&5), Some(&0.004));
        assert!(parse_schedule("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_entries() {
        assert!(parse_schedule("5:0.1").is_err());
        assert!(parse_schedule("x=0.1").is_err());
        assert!(parse_schedule("0=0.1").is_err());
        assert!(parse_schedule("3=-1").is_err());
    }

    #[test]
    fn test_linear_decay_reaches_floor() {
        let schedule = LrSchedule::new(1.0, 0.1, 3, BTreeMap::new());
        let mut lr   = schedule.initial();
        let mut seen = vec![lr];
        for epoch in 2..=6 {
            lr = schedule.next(lr, epoch);
            seen.push(lr);
        }
        let expected = [1.0, 0.7, 0.4, 0.1, 0.1, 0.1];
        for (got, want) in seen.iter().zip(expected) {
            assert!(approx(*got, want), "got {got}, want {want}");
        }
        assert!(seen.iter().all(|&lr| lr >= 0.1));
    }

    #[test]
    fn test_explicit_entries_override_decay() {
        let explicit = parse_schedule("1=0.5,3=0.25").unwrap();
        let schedule = LrSchedule::new(1.0, 0.01, 100, explicit);

        let lr1 = schedule.initial();
        assert!(approx(lr1, 0.5));
        let lr2 = schedule.next(lr1, 2);
        assert!(approx(lr2, 0.5 - 0.99 / 100.0));
        assert!(approx(schedule.next(lr2, 3), 0.25));
    }

    #[test]
    fn test_explicit_rate_is_floored() {
        let explicit = parse_schedule("2=0.0001").unwrap();
        let schedule = LrSchedule::new(0.1, 0.01, 10, explicit);
        assert!(approx(schedule.next(0.1, 2), 0.01));
    }
}

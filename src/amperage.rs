//! Amperage calculator
//!
//! Maps surplus power onto the discrete set of currents the charger accepts.
//! Everything here is pure; the sequencer and the solar policy call into it.

use crate::error::{AmpwiseError, Result};
use serde::Serialize;

// Float slack when comparing amps derived from a watt reading
const EPS: f64 = 1e-9;

/// Ascending, non-empty set of permitted charger currents (A)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmperageLevels(Vec<u32>);

impl AmperageLevels {
    pub fn new(levels: Vec<u32>) -> Result<Self> {
        if levels.is_empty() {
            return Err(AmpwiseError::validation(
                "amperage_levels",
                "At least one level is required",
            ));
        }
        if levels[0] == 0 || levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AmpwiseError::validation(
                "amperage_levels",
                "Levels must be positive and strictly ascending",
            ));
        }
        Ok(Self(levels))
    }

    pub fn lowest(&self) -> u32 {
        self.0[0]
    }

    pub fn contains(&self, amps: u32) -> bool {
        self.0.binary_search(&amps).is_ok()
    }

    /// Nearest permitted level; an exact tie goes to the lower level.
    pub fn snap(&self, requested: u32) -> u32 {
        let mut best = self.0[0];
        for &level in &self.0[1..] {
            if level.abs_diff(requested) < best.abs_diff(requested) {
                best = level;
            }
        }
        best
    }

    /// Highest level not above `amps`, or 0 when even the lowest is too much
    pub fn find_target(&self, amps: f64) -> u32 {
        self.0
            .iter()
            .rev()
            .copied()
            .find(|&level| f64::from(level) <= amps + EPS)
            .unwrap_or(0)
    }

    /// Level one step below `current`, or 0 when there is none
    pub fn step_down(&self, current: u32) -> u32 {
        self.0
            .iter()
            .rev()
            .copied()
            .find(|&level| level < current)
            .unwrap_or(0)
    }
}

/// Watts to amps at the given voltage
pub fn watts_to_amps(watts: f64, voltage: f64) -> f64 {
    if voltage <= 0.0 { 0.0 } else { watts / voltage }
}

/// Target current for a surplus reading.
///
/// While charging, any surplus covering the lowest level keeps the charger
/// running. From idle the surplus must additionally clear
/// `start_hysteresis_watts`, which leaves a dead band between the start and
/// stop thresholds.
pub fn surplus_target(
    levels: &AmperageLevels,
    surplus_watts: f64,
    voltage: f64,
    charging: bool,
    start_hysteresis_watts: f64,
) -> u32 {
    if !charging {
        let start_threshold = f64::from(levels.lowest()) * voltage + start_hysteresis_watts;
        if surplus_watts + EPS < start_threshold {
            return 0;
        }
    }
    levels.find_target(watts_to_amps(surplus_watts, voltage))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels() -> AmperageLevels {
        AmperageLevels::new(vec![6, 8, 10, 13, 16, 20, 24, 32]).unwrap()
    }

    #[test]
    fn rejects_unordered_levels() {
        assert!(AmperageLevels::new(vec![]).is_err());
        assert!(AmperageLevels::new(vec![0, 6]).is_err());
        assert!(AmperageLevels::new(vec![6, 6, 8]).is_err());
    }

    #[test]
    fn snap_prefers_lower_on_ties() {
        let l = levels();
        assert_eq!(l.snap(7), 6);
        assert_eq!(l.snap(9), 8);
        assert_eq!(l.snap(11), 10);
        assert_eq!(l.snap(12), 13);
        assert_eq!(l.snap(18), 16);
        assert_eq!(l.snap(28), 24);
        assert_eq!(l.snap(1), 6);
        assert_eq!(l.snap(63), 32);
        assert_eq!(l.snap(16), 16);
    }

    #[test]
    fn find_target_and_steps() {
        let l = levels();
        assert_eq!(l.find_target(5.9), 0);
        assert_eq!(l.find_target(6.0), 6);
        assert_eq!(l.find_target(12.9), 10);
        assert_eq!(l.find_target(100.0), 32);
        assert_eq!(l.step_down(16), 13);
        assert_eq!(l.step_down(6), 0);
        assert_eq!(l.step_down(15), 13);
    }

    #[test]
    fn surplus_hysteresis_band() {
        let l = levels();
        assert_eq!(surplus_target(&l, 1610.0, 230.0, false, 230.0), 6);
        assert_eq!(surplus_target(&l, 1380.0, 230.0, false, 230.0), 0);
        assert_eq!(surplus_target(&l, 1380.0, 230.0, true, 230.0), 6);
        assert_eq!(surplus_target(&l, 1150.0, 230.0, true, 230.0), 0);
        assert_eq!(surplus_target(&l, -500.0, 230.0, true, 230.0), 0);
    }
}

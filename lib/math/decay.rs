//! Voting-power decay schedules.
//!
//! A stake's voting weight shrinks as a staircase function of the time
//! elapsed since the voter last updated their votes: full power for
//! `full_power_seconds`, then one step down every `seconds_per_step`
//! until it reaches zero after `recalc_steps` steps.

use std::sync::LazyLock;

use crate::{
    math::fixed::{mul_div, Rounding},
    types::FULL_PERCENT,
};

/// Staircase decay configuration for one voting category.
#[derive(Clone, Debug)]
pub struct DecaySchedule {
    pub full_power_seconds: u64,
    /// Number of steps in the staircase, >= 1.
    pub recalc_steps: u64,
    pub seconds_per_step: u64,
    total_recalc_seconds: u64,
    /// `subtract_percent[i] = FULL_PERCENT * (i + 1) / recalc_steps`,
    /// one entry per step past full power.
    subtract_percent: Vec<u16>,
}

/// The `[full power, zero power]` boundaries of a schedule at a given
/// tally time.
#[derive(Clone, Copy, Debug)]
pub struct DecayWindow {
    pub full_power_time: u64,
    pub zero_power_time: u64,
}

impl DecaySchedule {
    pub fn new(
        full_power_seconds: u64,
        recalc_steps: u64,
        seconds_per_step: u64,
    ) -> Self {
        assert!(recalc_steps >= 1);
        let total_recalc_seconds = (recalc_steps - 1) * seconds_per_step;
        let subtract_percent = (1..recalc_steps)
            .map(|i| {
                ((u64::from(FULL_PERCENT) * i) / recalc_steps) as u16
            })
            .collect();
        Self {
            full_power_seconds,
            recalc_steps,
            seconds_per_step,
            total_recalc_seconds,
            subtract_percent,
        }
    }

    pub fn window(&self, now: u64) -> DecayWindow {
        let full_power_time = now.saturating_sub(self.full_power_seconds);
        DecayWindow {
            full_power_time,
            zero_power_time: full_power_time
                .saturating_sub(self.total_recalc_seconds),
        }
    }

    /// Stake remaining after decay, given the time of the last vote.
    ///
    /// Non-increasing in `now - last_vote_time`, with range `[0, stake]`.
    pub fn decayed_stake(
        &self,
        stake: u64,
        last_vote_time: u64,
        window: &DecayWindow,
    ) -> u64 {
        if last_vote_time > window.full_power_time {
            return stake;
        }
        if last_vote_time <= window.zero_power_time {
            return 0;
        }
        let step = (window.full_power_time - last_vote_time)
            / self.seconds_per_step;
        // step < recalc_steps - 1 because last_vote_time > zero_power_time
        let subtracted = mul_div(
            stake,
            u64::from(self.subtract_percent[step as usize]),
            u64::from(FULL_PERCENT),
            Rounding::Down,
        )
        .expect("percent is <= FULL_PERCENT");
        stake - subtracted
    }
}

const DAYS: u64 = 86_400;

pub static PRODUCER_DECAY: LazyLock<DecaySchedule> =
    LazyLock::new(|| DecaySchedule::new(360 * DAYS, 8, 45 * DAYS));
pub static COMMITTEE_DECAY: LazyLock<DecaySchedule> =
    LazyLock::new(|| DecaySchedule::new(360 * DAYS, 8, 45 * DAYS));
pub static WORKER_DECAY: LazyLock<DecaySchedule> =
    LazyLock::new(|| DecaySchedule::new(360 * DAYS, 8, 45 * DAYS));
pub static DELEGATOR_DECAY: LazyLock<DecaySchedule> =
    LazyLock::new(|| DecaySchedule::new(360 * DAYS, 8, 45 * DAYS));

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> DecaySchedule {
        DecaySchedule::new(1000, 4, 100)
    }

    #[test]
    fn test_full_power_before_threshold() {
        let s = schedule();
        let now = 10_000;
        let w = s.window(now);
        assert_eq!(w.full_power_time, 9000);
        assert_eq!(w.zero_power_time, 8700);
        // Voted within the full power window.
        assert_eq!(s.decayed_stake(4000, 9500, &w), 4000);
        assert_eq!(s.decayed_stake(4000, 9001, &w), 4000);
    }

    #[test]
    fn test_staircase_steps() {
        let s = schedule();
        let w = s.window(10_000);
        // subtract_percent = [25%, 50%, 75%]
        assert_eq!(s.decayed_stake(4000, 9000, &w), 3000);
        assert_eq!(s.decayed_stake(4000, 8901, &w), 3000);
        assert_eq!(s.decayed_stake(4000, 8900, &w), 2000);
        assert_eq!(s.decayed_stake(4000, 8800, &w), 1000);
        assert_eq!(s.decayed_stake(4000, 8701, &w), 1000);
    }

    #[test]
    fn test_zero_after_window() {
        let s = schedule();
        let w = s.window(10_000);
        assert_eq!(s.decayed_stake(4000, 8700, &w), 0);
        assert_eq!(s.decayed_stake(4000, 0, &w), 0);
    }

    #[test]
    fn test_monotone_in_elapsed_time() {
        let s = schedule();
        let w = s.window(10_000);
        let mut prev = u64::MAX;
        for last_vote in (0..=10_000).rev().step_by(17) {
            let cur = s.decayed_stake(123_456, last_vote, &w);
            assert!(cur <= prev.min(123_456));
            prev = cur;
        }
    }

    #[test]
    fn test_single_step_schedule() {
        // recalc_steps = 1: power drops straight to zero past full power.
        let s = DecaySchedule::new(1000, 1, 100);
        let w = s.window(10_000);
        assert_eq!(s.decayed_stake(500, 9001, &w), 500);
        assert_eq!(s.decayed_stake(500, 9000, &w), 0);
    }
}

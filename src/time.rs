//! Temporal types for simulation clocks.
//!
//! Simulation time is a fractional day count (`f64`) measured from a
//! scenario's start. A clock may optionally be anchored to a base calendar
//! date, in which case whole simulation days map onto real dates.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::PlanningError;

/// A simulation clock: elapsed fractional days, optionally anchored to a
/// calendar date.
///
/// # Examples
///
/// ```
/// use nucleus::SimulationClock;
/// use chrono::NaiveDate;
///
/// let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
/// let mut clock = SimulationClock::anchored(0.0, base);
/// clock.advance_to(3.25).unwrap();
/// assert_eq!(clock.time(), 3.25);
/// assert_eq!(clock.date(), Some(NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationClock {
    /// Time at which this clock started, in fractional days.
    start_time: f64,

    /// Current time, in fractional days. Never less than `start_time`.
    time: f64,

    /// Calendar date corresponding to day zero, if anchored.
    base_date: Option<NaiveDate>,
}

impl SimulationClock {
    /// Creates an unanchored clock starting at the given time.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError::InvalidPlanTime` if `start_time` is not finite.
    pub fn starting_at(start_time: f64) -> Result<Self, PlanningError> {
        if !start_time.is_finite() {
            return Err(PlanningError::InvalidPlanTime { time: start_time });
        }
        Ok(Self {
            start_time,
            time: start_time,
            base_date: None,
        })
    }

    /// Creates a clock anchored to a base calendar date.
    #[must_use]
    pub const fn anchored(start_time: f64, base_date: NaiveDate) -> Self {
        Self {
            start_time,
            time: start_time,
            base_date: Some(base_date),
        }
    }

    /// The time this clock started at.
    #[must_use]
    pub const fn start_time(&self) -> f64 {
        self.start_time
    }

    /// The current simulation time.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// The base calendar date, if this clock is anchored.
    #[must_use]
    pub const fn base_date(&self) -> Option<NaiveDate> {
        self.base_date
    }

    /// Advances the clock to the given time.
    ///
    /// # Errors
    ///
    /// Returns `PlanningError::InvalidPlanTime` for a non-finite target and
    /// `PlanningError::PastPlanningTime` for a target before the current
    /// time. The clock never moves backwards.
    pub fn advance_to(&mut self, time: f64) -> Result<(), PlanningError> {
        if !time.is_finite() {
            return Err(PlanningError::InvalidPlanTime { time });
        }
        if time < self.time {
            return Err(PlanningError::PastPlanningTime {
                planned: time,
                current: self.time,
            });
        }
        self.time = time;
        Ok(())
    }

    /// The calendar date for the current time, if anchored.
    ///
    /// Fractional days truncate toward the containing date.
    #[must_use]
    pub fn date(&self) -> Option<NaiveDate> {
        self.date_at(self.time)
    }

    /// The calendar date for an arbitrary simulation time, if anchored.
    ///
    /// Returns `None` for unanchored clocks, for negative times, and for
    /// times past the supported calendar range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn date_at(&self, time: f64) -> Option<NaiveDate> {
        let base = self.base_date?;
        if !time.is_finite() || time < 0.0 {
            return None;
        }
        let whole_days = time.floor();
        if whole_days > u64::MAX as f64 {
            return None;
        }
        base.checked_add_days(Days::new(whole_days as u64))
    }

    /// The simulation time corresponding to midnight of a calendar date.
    ///
    /// Returns `None` for unanchored clocks and for dates before the base.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn time_of(&self, date: NaiveDate) -> Option<f64> {
        let base = self.base_date?;
        let days = date.signed_duration_since(base).num_days();
        if days < 0 {
            return None;
        }
        Some(days as f64)
    }
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            time: 0.0,
            base_date: None,
        }
    }
}

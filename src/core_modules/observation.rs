// THEORY:
// The `observation` module is the most fundamental unit of the detector. An
// `Observation` is a "dumb" data container for one reading of the degradation
// index at one pixel: when it was taken, what the index was, and whether the
// upstream masking layer considered it usable.
//
// Time is expressed as fractional (Julian) years since 1970-01-01. Every other
// module reasons in this unit, so the harmonic basis has exactly one seasonal
// cycle per unit of `t`.
//
// A `PixelSeries` is the ordered history of one pixel. Series coming from
// different sensors may interleave or even repeat timestamps; they are pooled
// with a stable sort and duplicates are kept.

use chrono::{DateTime, NaiveDate, Utc};
use std::f64::consts::TAU;

pub type FractionalYear = f64;
pub type IndexValue = f64;

/// Length of a Julian year in milliseconds.
pub const MILLIS_PER_YEAR: f64 = 31_557_600_000.0;
/// Calendar year of `t = 0`.
pub const EPOCH_YEAR: i32 = 1970;

/// A single reading of the index at one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Fractional years since 1970-01-01.
    pub timestamp: FractionalYear,
    /// The index value. Meaningless when `valid` is false.
    pub value: IndexValue,
    /// False when the reading was masked (cloud, shadow, sensor gap).
    pub valid: bool,
}

impl Observation {
    pub fn new(timestamp: FractionalYear, value: IndexValue) -> Self {
        Self {
            timestamp,
            value,
            valid: true,
        }
    }

    /// A masked reading at `timestamp`.
    pub fn missing(timestamp: FractionalYear) -> Self {
        Self {
            timestamp,
            value: 0.0,
            valid: false,
        }
    }

    pub fn from_unix_millis(millis: i64, value: IndexValue, valid: bool) -> Self {
        Self {
            timestamp: millis as f64 / MILLIS_PER_YEAR,
            value,
            valid,
        }
    }

    /// The harmonic design vector `(1, t, sin 2πt, cos 2πt)`.
    pub fn design_vector(&self) -> [f64; 4] {
        design_vector(self.timestamp)
    }
}

pub fn design_vector(t: FractionalYear) -> [f64; 4] {
    let season = TAU * t;
    [1.0, t, season.sin(), season.cos()]
}

/// January 1st of `year` in fractional years, on the same axis as
/// `from_unix_millis`, so window edges fall on midnight of the new year.
pub fn year_start(year: i32) -> FractionalYear {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .map(date_to_fractional_year)
        .unwrap_or((year - EPOCH_YEAR) as f64)
}

/// Converts a calendar date to fractional years, counting elapsed days in
/// Julian years the same way `from_unix_millis` does.
pub fn date_to_fractional_year(date: NaiveDate) -> FractionalYear {
    let epoch = DateTime::<Utc>::UNIX_EPOCH.date_naive();
    date.signed_duration_since(epoch).num_days() as f64 / 365.25
}

/// The ordered observation history of one pixel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelSeries {
    observations: Vec<Observation>,
}

impl PixelSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a series, sorting the input by timestamp.
    pub fn from_observations(mut observations: Vec<Observation>) -> Self {
        sort_by_time(&mut observations);
        Self { observations }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn valid(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(|o| o.valid)
    }

    pub fn valid_count(&self) -> usize {
        self.valid().count()
    }

    /// Appends `other` and re-sorts. Duplicate timestamps are kept in arrival order.
    pub fn merge(&mut self, other: PixelSeries) {
        if other.is_empty() {
            return;
        }
        self.observations.extend(other.observations);
        sort_by_time(&mut self.observations);
    }

    /// Observations with `start <= t < end`.
    pub fn window(&self, start: FractionalYear, end: FractionalYear) -> PixelSeries {
        let observations = self
            .observations
            .iter()
            .filter(|o| o.timestamp >= start && o.timestamp < end)
            .copied()
            .collect();
        PixelSeries { observations }
    }

    /// Valid observations strictly after `t`.
    pub fn valid_after(&self, t: FractionalYear) -> PixelSeries {
        let observations = self
            .observations
            .iter()
            .filter(|o| o.valid && o.timestamp > t)
            .copied()
            .collect();
        PixelSeries { observations }
    }

    pub fn last(&self) -> Option<&Observation> {
        self.observations.last()
    }
}

impl From<Vec<Observation>> for PixelSeries {
    fn from(observations: Vec<Observation>) -> Self {
        Self::from_observations(observations)
    }
}

fn sort_by_time(observations: &mut [Observation]) {
    observations.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
}

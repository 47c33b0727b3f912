//! Age-banded decay of vote influence.

use crate::error::ConfigError;
use crate::records::TimePeriod;

pub const MIN_DURATION_MONTHS: u32 = 1;
pub const MAX_DURATION_MONTHS: u32 = 999;
pub const MIN_MULTIPLIER: f64 = 0.05;
pub const MAX_MULTIPLIER: f64 = 5.0;

/// Bands must be non-empty, in range, and never grow stronger with age.
pub fn validate_periods(periods: &[TimePeriod]) -> Result<(), ConfigError> {
    if periods.is_empty() {
        return Err(ConfigError::EmptyPeriods);
    }
    let mut previous: Option<f64> = None;
    for (index, p) in periods.iter().enumerate() {
        if !(MIN_DURATION_MONTHS..=MAX_DURATION_MONTHS).contains(&p.duration_months) {
            return Err(ConfigError::DurationOutOfRange { index, months: p.duration_months });
        }
        if !(MIN_MULTIPLIER..=MAX_MULTIPLIER).contains(&p.multiplier) {
            return Err(ConfigError::MultiplierOutOfRange { index, multiplier: p.multiplier });
        }
        if let Some(previous) = previous {
            if p.multiplier > previous {
                return Err(ConfigError::IncreasingMultiplier {
                    index,
                    multiplier: p.multiplier,
                    previous,
                });
            }
        }
        previous = Some(p.multiplier);
    }
    Ok(())
}

/// Multiplier for a vote `vote_age_months` old.
///
/// Walks the bands accumulating their durations and returns the multiplier
/// of the first band whose running total passes the age. Ages at or below
/// zero get the first band, ages past every band get the last one.
pub fn decay_multiplier(periods: &[TimePeriod], vote_age_months: f64) -> Result<f64, ConfigError> {
    let first = periods.first().ok_or(ConfigError::EmptyPeriods)?;
    Ok(walk(first, periods, vote_age_months))
}

fn walk(first: &TimePeriod, periods: &[TimePeriod], vote_age_months: f64) -> f64 {
    // NaN lands here too
    if !(vote_age_months > 0.0) {
        return first.multiplier;
    }
    let mut elapsed = 0.0;
    let mut last = first;
    for p in periods {
        elapsed += f64::from(p.duration_months);
        if elapsed > vote_age_months {
            return p.multiplier;
        }
        last = p;
    }
    last.multiplier
}

/// A period list that passed `validate_periods`, so never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayTable {
    first: TimePeriod,
    periods: Vec<TimePeriod>,
}

impl DecayTable {
    pub fn new(periods: Vec<TimePeriod>) -> Result<Self, ConfigError> {
        validate_periods(&periods)?;
        let first = *periods.first().ok_or(ConfigError::EmptyPeriods)?;
        Ok(Self { first, periods })
    }

    pub fn periods(&self) -> &[TimePeriod] {
        &self.periods
    }

    /// Total months covered before the last band takes over for good.
    pub fn span_months(&self) -> u32 {
        self.periods.iter().map(|p| p.duration_months).sum()
    }

    pub fn multiplier(&self, vote_age_months: f64) -> f64 {
        walk(&self.first, &self.periods, vote_age_months)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn bands() -> Vec<TimePeriod> {
        vec![TimePeriod::new(1, 1.5), TimePeriod::new(2, 1.2), TimePeriod::new(999, 0.25)]
    }

    #[test]
    fn picks_band_by_cumulative_duration() {
        let p = bands();
        assert_eq!(decay_multiplier(&p, 0.0).unwrap(), 1.5);
        assert_eq!(decay_multiplier(&p, 0.99).unwrap(), 1.5);
        assert_eq!(decay_multiplier(&p, 1.0).unwrap(), 1.2);
        assert_eq!(decay_multiplier(&p, 2.5).unwrap(), 1.2);
        assert_eq!(decay_multiplier(&p, 3.0).unwrap(), 0.25);
        assert_eq!(decay_multiplier(&p, 500.0).unwrap(), 0.25);
    }

    #[test]
    fn out_of_range_ages_clamp_to_the_ends() {
        let p = bands();
        assert_eq!(decay_multiplier(&p, -4.0).unwrap(), 1.5);
        assert_eq!(decay_multiplier(&p, f64::NAN).unwrap(), 1.5);
        assert_eq!(decay_multiplier(&p, 1e9).unwrap(), 0.25);
    }

    #[test]
    fn empty_table_fails_fast() {
        assert_eq!(decay_multiplier(&[], 1.0), Err(ConfigError::EmptyPeriods));
        assert_eq!(DecayTable::new(vec![]), Err(ConfigError::EmptyPeriods));
    }

    #[test]
    fn validation_rejects_bad_bands() {
        assert!(matches!(
            validate_periods(&[TimePeriod::new(0, 1.0)]),
            Err(ConfigError::DurationOutOfRange { index: 0, .. })
        ));
        assert!(matches!(
            validate_periods(&[TimePeriod::new(1, 1.0), TimePeriod::new(1000, 1.0)]),
            Err(ConfigError::DurationOutOfRange { index: 1, .. })
        ));
        assert!(matches!(
            validate_periods(&[TimePeriod::new(1, 0.01)]),
            Err(ConfigError::MultiplierOutOfRange { .. })
        ));
        assert!(matches!(
            validate_periods(&[TimePeriod::new(1, f64::NAN)]),
            Err(ConfigError::MultiplierOutOfRange { .. })
        ));
        assert!(matches!(
            validate_periods(&[TimePeriod::new(1, 1.0), TimePeriod::new(1, 2.0)]),
            Err(ConfigError::IncreasingMultiplier { index: 1, .. })
        ));
        assert!(validate_periods(&bands()).is_ok());
    }

    #[test]
    fn table_agrees_with_the_free_function() {
        let table = DecayTable::new(bands()).unwrap();
        for age in [-1.0, 0.0, 0.5, 1.0, 2.99, 3.0, 1e6, f64::NAN] {
            assert_eq!(table.multiplier(age), decay_multiplier(&bands(), age).unwrap(), "age {}", age);
        }
    }

    #[test]
    fn multiplier_never_increases_with_age() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let n = rng.gen_range(1..6);
            let mut m = MAX_MULTIPLIER;
            let periods: Vec<TimePeriod> = (0..n)
                .map(|_| {
                    m = rng.gen_range(MIN_MULTIPLIER..=m);
                    TimePeriod::new(rng.gen_range(1..=24), m)
                })
                .collect();
            let table = DecayTable::new(periods).unwrap();
            assert_eq!(table.multiplier(0.0), table.periods()[0].multiplier);

            let mut last = f64::INFINITY;
            let mut age = 0.0;
            while age < f64::from(table.span_months()) + 5.0 {
                let now = table.multiplier(age);
                assert!(now <= last, "multiplier rose from {} to {} at {}", last, now, age);
                last = now;
                age += 0.25;
            }
        }
    }
}

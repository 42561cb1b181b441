#![forbid(unsafe_code)]

use crate::error::{BoxError, Error};
use crate::schedule::TimeProfile;
use chrono::{Datelike, NaiveDateTime};
use std::fmt;
use std::sync::Arc;

pub type LimitFn = dyn Fn(NaiveDateTime) -> Result<i64, BoxError> + Send + Sync;

/// Decides which CPU limit applies at a given moment.
#[derive(Clone)]
pub enum LimitPolicy {
    /// The same profile every day.
    Daily(TimeProfile),
    /// One profile per weekday, Monday first.
    Weekly(Box<[TimeProfile; 7]>),
    /// Arbitrary function of the local time.
    Custom(Arc<LimitFn>),
}

impl LimitPolicy {
    pub fn daily(profile: TimeProfile) -> Self {
        Self::Daily(profile)
    }

    pub fn weekly(profiles: Vec<TimeProfile>) -> Result<Self, Error> {
        let count = profiles.len();
        let days: [TimeProfile; 7] = profiles
            .try_into()
            .map_err(|_| Error::WeekdayCount(count))?;
        Ok(Self::Weekly(Box::new(days)))
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(NaiveDateTime) -> Result<i64, BoxError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Build the policy described by the governor section of the config.
    /// A weekly table takes precedence over the daily profile.
    pub fn from_config(config: &config::Governor) -> Result<Self, Error> {
        const DAY_NAMES: [&str; 7] = [
            "monday",
            "tuesday",
            "wednesday",
            "thursday",
            "friday",
            "saturday",
            "sunday",
        ];
        match &config.weekly {
            Some(weekly) => {
                let profiles = DAY_NAMES
                    .iter()
                    .zip(weekly.days())
                    .map(|(name, spec)| TimeProfile::parse(*name, spec))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::weekly(profiles)
            }
            None => Ok(Self::daily(TimeProfile::parse("daily", &config.profile)?)),
        }
    }

    /// Limit that applies at `at`, never negative. Failures of a custom
    /// function are returned as-is.
    pub fn compute_limit(&self, at: NaiveDateTime) -> Result<u32, Error> {
        match self {
            Self::Daily(profile) => Ok(profile.limit_for(at.time())),
            Self::Weekly(days) => {
                let day = at.weekday().num_days_from_monday() as usize;
                Ok(days[day].limit_for(at.time()))
            }
            Self::Custom(f) => {
                let raw = f(at).map_err(Error::PolicyFunction)?;
                Ok(raw.clamp(0, i64::from(u32::MAX)) as u32)
            }
        }
    }
}

impl fmt::Debug for LimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily(profile) => f.debug_tuple("Daily").field(&profile.to_string()).finish(),
            Self::Weekly(days) => f
                .debug_tuple("Weekly")
                .field(&days.iter().map(ToString::to_string).collect::<Vec<_>>())
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn daily_profile_applies_every_day() {
        let profile = TimeProfile::parse(
            "daily",
            "00:00-05:59@100%,06:00-08:59@50%,09:00-17:59@0%,18:00-21:59@50%,22:00-23:59@100%",
        )
        .unwrap();
        let policy = LimitPolicy::daily(profile);

        for day in 1..=7 {
            assert_eq!(policy.compute_limit(at(2024, 1, day, 7, 30)).unwrap(), 50);
            assert_eq!(policy.compute_limit(at(2024, 1, day, 12, 35)).unwrap(), 0);
            assert_eq!(policy.compute_limit(at(2024, 1, day, 23, 51)).unwrap(), 100);
        }
    }

    #[test]
    fn weekly_profile_picks_the_weekday() {
        let weekday = TimeProfile::parse("weekday", "00:00-23:59 @ 30%").unwrap();
        let weekend = TimeProfile::parse("weekend", "00:00-23:59 @ 90%").unwrap();
        let mut days = vec![weekday; 5];
        days.extend([weekend.clone(), weekend]);
        let policy = LimitPolicy::weekly(days).unwrap();

        let tuesday = at(2024, 1, 2, 10, 0);
        let saturday = at(2024, 1, 6, 10, 0);
        assert_eq!(tuesday.weekday(), Weekday::Tue);
        assert_eq!(saturday.weekday(), Weekday::Sat);

        assert_eq!(policy.compute_limit(tuesday).unwrap(), 30);
        assert_eq!(policy.compute_limit(saturday).unwrap(), 90);
    }

    #[test]
    fn weekly_needs_seven_days() {
        let profile = TimeProfile::parse("p", "00:00-23:59 @ 30%").unwrap();
        let err = LimitPolicy::weekly(vec![profile; 6]).unwrap_err();
        assert!(matches!(err, Error::WeekdayCount(6)));
    }

    #[test]
    fn custom_result_is_clamped() {
        let policy = LimitPolicy::custom(|_| Ok(-40));
        assert_eq!(policy.compute_limit(at(2024, 1, 1, 0, 0)).unwrap(), 0);

        let policy = LimitPolicy::custom(|_| Ok(75));
        assert_eq!(policy.compute_limit(at(2024, 1, 1, 0, 0)).unwrap(), 75);
    }

    #[test]
    fn custom_failure_propagates() {
        let policy = LimitPolicy::custom(|_| Err("backend unavailable".into()));
        let err = policy.compute_limit(at(2024, 1, 1, 0, 0)).unwrap_err();
        assert!(matches!(err, Error::PolicyFunction(_)));
        assert!(err.to_string().contains("backend unavailable"));
    }

    #[test]
    fn config_weekly_takes_precedence() {
        let mut governor = config::Governor {
            profile: "00:00-23:59 @ 10%".to_owned(),
            ..Default::default()
        };
        let daily = LimitPolicy::from_config(&governor).unwrap();
        assert_eq!(daily.compute_limit(at(2024, 1, 6, 12, 0)).unwrap(), 10);

        let work = "00:00-23:59 @ 40%".to_owned();
        let rest = "00:00-23:59 @ 80%".to_owned();
        governor.weekly = Some(config::WeeklyProfiles {
            monday: work.clone(),
            tuesday: work.clone(),
            wednesday: work.clone(),
            thursday: work.clone(),
            friday: work,
            saturday: rest.clone(),
            sunday: rest,
        });
        let weekly = LimitPolicy::from_config(&governor).unwrap();
        assert_eq!(weekly.compute_limit(at(2024, 1, 6, 12, 0)).unwrap(), 80);
        assert_eq!(weekly.compute_limit(at(2024, 1, 5, 12, 0)).unwrap(), 40);
    }

    #[test]
    fn config_with_bad_profile_fails() {
        let governor = config::Governor {
            profile: "whenever".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            LimitPolicy::from_config(&governor),
            Err(Error::ProfileFormat { .. })
        ));
    }
}

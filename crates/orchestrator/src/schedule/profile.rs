#![forbid(unsafe_code)]

use crate::error::Error;
use chrono::{NaiveTime, Timelike};
use std::fmt;

const TIME_FORMAT: &str = "%H:%M";

/// A time-of-day window, both ends inclusive, with the limit that applies
/// inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileEntry {
    start: NaiveTime,
    end: NaiveTime,
    limit: u32,
}

impl ProfileEntry {
    pub fn new(start: NaiveTime, end: NaiveTime, limit: u32) -> Result<Self, Error> {
        if start > end {
            return Err(Error::ProfileFormat {
                spec: format!("{}-{}", start.format(TIME_FORMAT), end.format(TIME_FORMAT)),
                reason: "window ends before it starts".to_owned(),
            });
        }
        Ok(Self { start, end, limit })
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

impl fmt::Display for ProfileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} @ {}%",
            self.start.format(TIME_FORMAT),
            self.end.format(TIME_FORMAT),
            self.limit
        )
    }
}

/// Maps a time of day to a CPU limit percentage.
///
/// Entries are sorted and never overlap. Times not covered by any entry map
/// to a limit of 0, which pauses scanning rather than lifting the limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeProfile {
    name: String,
    entries: Vec<ProfileEntry>,
}

impl TimeProfile {
    pub fn new(name: impl Into<String>, entries: Vec<ProfileEntry>) -> Result<Self, Error> {
        let name = name.into();
        if entries.is_empty() {
            return Err(Error::EmptyProfile(name));
        }
        for (index, pair) in entries.windows(2).enumerate() {
            if pair[0].end >= pair[1].start {
                return Err(Error::ProfileOrder {
                    name,
                    index: index + 1,
                });
            }
        }
        Ok(Self { name, entries })
    }

    /// Parse a comma separated list of `HH:MM-HH:MM @ N%` entries.
    pub fn parse(name: impl Into<String>, spec: &str) -> Result<Self, Error> {
        let entries = spec
            .split(',')
            .map(|item| Self::parse_entry(spec, item))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name, entries)
    }

    fn parse_entry(spec: &str, item: &str) -> Result<ProfileEntry, Error> {
        let format_err = |reason: String| Error::ProfileFormat {
            spec: spec.to_owned(),
            reason,
        };

        let parts: Vec<&str> = item.split('@').collect();
        let [range, limit] = parts.as_slice() else {
            return Err(format_err(format!(
                "expected `HH:MM-HH:MM @ N%`, got `{}`",
                item.trim()
            )));
        };

        let times: Vec<&str> = range.split('-').collect();
        let [start, end] = times.as_slice() else {
            return Err(format_err(format!("malformed time range `{}`", range.trim())));
        };
        let parse_time = |raw: &str| {
            NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
                .map_err(|err| format_err(format!("malformed time `{}`: {err}", raw.trim())))
        };
        let start = parse_time(start)?;
        let end = parse_time(end)?;

        let raw_limit = limit.trim();
        let digits = raw_limit.strip_suffix('%').unwrap_or(raw_limit).trim();
        let limit = digits
            .parse::<u32>()
            .map_err(|err| format_err(format!("malformed percentage `{raw_limit}`: {err}")))?;

        ProfileEntry::new(start, end, limit).map_err(|_| {
            format_err(format!("time range `{}` ends before it starts", range.trim()))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[ProfileEntry] {
        &self.entries
    }

    /// Limit for the given time of day, at minute resolution.
    pub fn limit_for(&self, time: NaiveTime) -> u32 {
        let time = NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time);
        self.entries
            .iter()
            .find(|entry| entry.contains(time))
            .map(ProfileEntry::limit)
            .unwrap_or(0)
    }
}

impl fmt::Display for TimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            entry.fmt(f)?;
        }
        Ok(())
    }
}

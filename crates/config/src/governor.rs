use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::path::PathBuf;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Governor {
    /// Whether the CPU limit of the scanning daemon is managed at all.
    pub enabled: bool,

    /// Static process id of the daemon to throttle. Checked before
    /// `pid_file`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// File holding the daemon's process id on its first non-blank line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<PathBuf>,

    /// Floor for the limit handed to the throttling tool, in percent.
    ///
    /// ## Note
    ///
    /// Profiles may request less than this (down to 0). Such values pause
    /// local scan submission, but the daemon itself is never throttled below
    /// the floor since it would stop answering.
    pub min_limit: u32,

    /// How often the active profile is re-evaluated and applied. **Measured
    /// in seconds**, must be at least 60.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub update_interval: Duration,

    /// Keep all bookkeeping but never touch the live process.
    pub mocking: bool,

    /// Program used to throttle the daemon. It is invoked as
    /// `<limiter> --pid=<pid> --limit=<percent> --lazy`.
    pub limiter: PathBuf,

    /// Extra arguments passed to the limiter before the pid and limit, e.g.
    /// `["--include-children"]`.
    pub limiter_args: Vec<String>,

    /// Daily time profile, e.g. `00:00-05:59 @ 100%, 06:00-23:59 @ 50%`.
    /// Ignored when `weekly` is present.
    pub profile: String,

    /// One profile per day of the week.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly: Option<WeeklyProfiles>,
}

impl Default for Governor {
    fn default() -> Self {
        Self {
            enabled: true,
            pid: None,
            pid_file: Some(PathBuf::from("/run/clamav/clamd.pid")),
            min_limit: 20,
            update_interval: Duration::from_secs(60),
            mocking: false,
            limiter: PathBuf::from("cpulimit"),
            limiter_args: Vec::new(),
            profile: "00:00-23:59 @ 100%".to_owned(),
            weekly: None,
        }
    }
}

/// Profile specifications indexed by weekday. All seven must be given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeeklyProfiles {
    pub monday: String,
    pub tuesday: String,
    pub wednesday: String,
    pub thursday: String,
    pub friday: String,
    pub saturday: String,
    pub sunday: String,
}

impl WeeklyProfiles {
    /// Profiles in ISO weekday order, Monday first.
    pub fn days(&self) -> [&str; 7] {
        [
            &self.monday,
            &self.tuesday,
            &self.wednesday,
            &self.thursday,
            &self.friday,
            &self.saturday,
            &self.sunday,
        ]
    }
}

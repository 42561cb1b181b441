#![forbid(unsafe_code)]

use chrono::NaiveDate;
use orchestrator::error::Error;
use orchestrator::governor::{
    LimitChange, ProcessLimitController, ProcessLimiter, ScheduledLimitUpdater, TargetProcess,
    MIN_UPDATE_PERIOD,
};
use orchestrator::schedule::{LimitPolicy, TimeProfile};
use orchestrator::{BoxError, FixedClock, ScanGate};
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::tempdir;

const WORKDAY: &str = "00:00-05:59@100%,06:00-08:59@50%,09:00-17:59@0%,18:00-21:59@50%,22:00-23:59@100%";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Set(u32, u32),
    Clear(u32),
}

#[derive(Debug, Clone, Default)]
struct SpyLimiter {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl SpyLimiter {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessLimiter for SpyLimiter {
    fn set_limit(&self, pid: u32, percent: u32) -> Result<(), Error> {
        self.calls.lock().unwrap().push(Call::Set(pid, percent));
        Ok(())
    }

    fn clear_limit(&self, pid: u32) -> Result<(), Error> {
        self.calls.lock().unwrap().push(Call::Clear(pid));
        Ok(())
    }
}

struct Sleeper(Child);

impl Sleeper {
    fn spawn() -> Self {
        Self(Command::new("sleep").arg("30").spawn().unwrap())
    }

    fn pid(&self) -> u32 {
        self.0.id()
    }
}

impl Drop for Sleeper {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn at(hour: u32, minute: u32) -> FixedClock {
    FixedClock(
        NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap(),
    )
}

#[test]
fn pid_file_target_follows_the_process() {
    let dir = tempdir().unwrap();
    let pid_file = dir.path().join("clamd.pid");
    let first = Sleeper::spawn();
    std::fs::write(&pid_file, format!("{}\n", first.pid())).unwrap();

    let limiter = SpyLimiter::default();
    let policy = LimitPolicy::daily(TimeProfile::parse("workday", WORKDAY).unwrap());
    let controller = ProcessLimitController::new(
        TargetProcess::PidFile(pid_file.clone()),
        policy,
        Box::new(limiter.clone()),
    )
    .with_clock(Box::new(at(7, 30)));

    let changes = Arc::new(Mutex::new(Vec::<LimitChange>::new()));
    {
        let changes = changes.clone();
        controller.add_listener(move |change: &LimitChange| -> Result<(), BoxError> {
            changes.lock().unwrap().push(*change);
            Ok(())
        });
    }

    assert!(controller.apply_current_policy_limit().unwrap());
    assert!(!controller.apply_current_policy_limit().unwrap());

    // clamd restarted under a new pid.
    let second = Sleeper::spawn();
    std::fs::write(&pid_file, format!("{}\n", second.pid())).unwrap();
    assert!(controller.apply_current_policy_limit().unwrap());

    controller.deactivate().unwrap();
    assert_eq!(controller.last_seen_limit(), Some(100));

    assert_eq!(
        limiter.calls(),
        [
            Call::Set(first.pid(), 50),
            Call::Set(second.pid(), 50),
            Call::Clear(second.pid()),
        ]
    );
    let changes = changes.lock().unwrap();
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[1].old, Some(50));
    assert_eq!(changes[2].new, 100);
}

#[test]
fn dead_target_is_left_alone() {
    let dir = tempdir().unwrap();
    let pid_file = dir.path().join("clamd.pid");
    let pid = {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().unwrap();
        child.id()
    };
    std::fs::write(&pid_file, pid.to_string()).unwrap();

    let limiter = SpyLimiter::default();
    let controller = ProcessLimitController::new(
        TargetProcess::PidFile(pid_file),
        LimitPolicy::custom(|_| Ok(40)),
        Box::new(limiter.clone()),
    );

    assert!(!controller.apply_current_policy_limit().unwrap());
    controller.deactivate().unwrap();
    assert!(limiter.calls().is_empty());
    assert_eq!(controller.last_seen_limit(), None);
}

#[test]
fn office_hours_pause_scanning_and_floor_the_limiter() {
    let target = Sleeper::spawn();
    let limiter = SpyLimiter::default();
    let policy = LimitPolicy::daily(TimeProfile::parse("workday", WORKDAY).unwrap());
    let controller = ProcessLimitController::new(
        TargetProcess::Static(target.pid()),
        policy,
        Box::new(limiter.clone()),
    )
    .with_clock(Box::new(at(12, 35)))
    .with_min_limit(20);

    assert!(controller.is_open());
    assert!(controller.apply_current_policy_limit().unwrap());
    assert_eq!(controller.last_seen_limit(), Some(0));
    assert!(controller.is_scan_paused());
    assert!(!controller.is_open());
    assert_eq!(limiter.calls(), [Call::Set(target.pid(), 20)]);
}

#[test]
fn updater_drives_the_controller() {
    let target = Sleeper::spawn();
    let limiter = SpyLimiter::default();
    let controller = Arc::new(
        ProcessLimitController::new(
            TargetProcess::supplier({
                let pid = target.pid();
                move || Some(pid)
            }),
            LimitPolicy::custom(|_| Ok(75)),
            Box::new(limiter.clone()),
        )
        .with_mocking(true),
    );
    let updater = ScheduledLimitUpdater::new(controller.clone(), MIN_UPDATE_PERIOD).unwrap();
    updater.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.last_seen_limit().is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    updater.close();

    assert_eq!(controller.last_seen_limit(), Some(75));
    // Mocking keeps the real limiter out of it.
    assert!(limiter.calls().is_empty());
}

#[test]
fn controller_from_config() {
    let dir = tempdir().unwrap();
    let config = config::Config::load_multiple([dir.path().join("absent.toml")]).unwrap();
    let controller = ProcessLimitController::from_config(&config.governor)
        .unwrap()
        .unwrap();
    assert_eq!(controller.min_limit(), 20);
    assert!(!controller.is_mocking());

    let disabled = config::Governor {
        enabled: false,
        ..config::Governor::default()
    };
    assert!(ProcessLimitController::from_config(&disabled).unwrap().is_none());
}

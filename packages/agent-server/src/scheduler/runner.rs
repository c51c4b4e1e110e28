//! Tracks each scheduled task's last-run timestamp on disk (`var/<task>.last`,
//! an ISO-8601 line) so the scheduler is idempotent across restarts: a task
//! already run inside the current interval window does not fire again just
//! because the daemon restarted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::grammar::Schedule;

/// Runs schedules against a wall-clock, persisting last-run timestamps
/// under a directory (normally `AgentConfig::var`).
pub struct SchedulerRunner {
    var_dir: PathBuf,
    last_run: HashMap<String, f64>,
}

impl SchedulerRunner {
    #[must_use]
    pub fn new(var_dir: PathBuf) -> Self {
        Self { var_dir, last_run: HashMap::new() }
    }

    fn last_run_path(&self, task: &str) -> PathBuf {
        self.var_dir.join(format!("{task}.last"))
    }

    /// Loads a task's persisted last-run timestamp, if any, caching it.
    /// A missing or unparseable file is treated as "never run" (epoch),
    /// returning `None` so callers fall back to their own default.
    pub fn load(&mut self, task: &str) -> Option<f64> {
        if let Some(ts) = self.last_run.get(task) {
            return Some(*ts);
        }
        let raw = std::fs::read_to_string(self.last_run_path(task)).ok()?;
        #[allow(clippy::cast_precision_loss)]
        let ts = DateTime::parse_from_rfc3339(raw.trim()).ok()?.with_timezone(&Utc).timestamp_millis() as f64 / 1000.0;
        self.last_run.insert(task.to_string(), ts);
        Some(ts)
    }

    /// Resolves `task`'s next-fire instant, given `schedule`, the current
    /// `weekday`/`minutes_since_midnight`/`now` (Unix seconds). Returns
    /// `Some(now)` when the task is inside its window and either has never
    /// run or at least `interval_minutes` have elapsed since its last run;
    /// `None` otherwise.
    pub fn next_fire(&mut self, task: &str, schedule: &Schedule, weekday: usize, minutes_since_midnight: u32, now: f64) -> Option<f64> {
        if !schedule.in_window(weekday, minutes_since_midnight) {
            return None;
        }
        match self.load(task) {
            None => Some(now),
            Some(last) if now - last >= f64::from(schedule.interval_minutes) * 60.0 => Some(now),
            Some(_) => None,
        }
    }

    /// Records that `task` fired at `timestamp` (Unix seconds), persisting
    /// an ISO-8601 line to disk. `success` does not change what's
    /// persisted -- the window logic only cares when the task last ran --
    /// but is logged so a string of failures is visible without scraping
    /// task output.
    ///
    /// # Errors
    /// Returns an I/O error if the timestamp file cannot be written.
    pub fn record_run(&mut self, task: &str, success: bool, timestamp: f64) -> std::io::Result<()> {
        self.last_run.insert(task.to_string(), timestamp);
        std::fs::create_dir_all(&self.var_dir)?;
        #[allow(clippy::cast_possible_truncation)]
        let secs = timestamp.trunc() as i64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = (timestamp.fract() * 1e9).round() as u32;
        let at = DateTime::from_timestamp(secs, nanos).ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "timestamp out of range"))?;
        if !success {
            tracing::warn!(task, "scheduled task run failed");
        }
        write_atomic(&self.last_run_path(task), &at.to_rfc3339())
    }
}

fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::scheduler::grammar::Schedule;

    #[test]
    fn never_run_fires_inside_window() {
        let dir = tempdir().unwrap();
        let mut runner = SchedulerRunner::new(dir.path().to_path_buf());
        let sched = Schedule::parse("00:00-23:59@60").unwrap();
        assert_eq!(runner.next_fire("checks", &sched, 0, 120, 1_000.0), Some(1_000.0));
    }

    #[test]
    fn does_not_refire_before_interval_elapses() {
        let dir = tempdir().unwrap();
        let mut runner = SchedulerRunner::new(dir.path().to_path_buf());
        let sched = Schedule::parse("00:00-23:59@60").unwrap();
        runner.record_run("checks", true, 1_000.0).unwrap();
        assert_eq!(runner.next_fire("checks", &sched, 0, 120, 1_000.0 + 30.0), None);
    }

    #[test]
    fn refires_after_interval_elapses() {
        let dir = tempdir().unwrap();
        let mut runner = SchedulerRunner::new(dir.path().to_path_buf());
        let sched = Schedule::parse("00:00-23:59@60").unwrap();
        runner.record_run("checks", true, 1_000.0).unwrap();
        assert_eq!(runner.next_fire("checks", &sched, 0, 120, 1_000.0 + 3_601.0), Some(1_000.0 + 3_601.0));
    }

    #[test]
    fn last_run_survives_across_runner_instances() {
        let dir = tempdir().unwrap();
        {
            let mut runner = SchedulerRunner::new(dir.path().to_path_buf());
            runner.record_run("checks", true, 500.0).unwrap();
        }
        let mut runner2 = SchedulerRunner::new(dir.path().to_path_buf());
        assert_eq!(runner2.load("checks"), Some(500.0));
    }

    #[test]
    fn last_run_is_persisted_as_an_iso8601_line() {
        let dir = tempdir().unwrap();
        let mut runner = SchedulerRunner::new(dir.path().to_path_buf());
        runner.record_run("checks", true, 500.0).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("checks.last")).unwrap();
        assert!(DateTime::parse_from_rfc3339(raw.trim()).is_ok(), "expected an RFC3339/ISO-8601 line, got {raw:?}");
    }

    #[test]
    fn missing_file_is_tolerated_as_never_run() {
        let dir = tempdir().unwrap();
        let mut runner = SchedulerRunner::new(dir.path().to_path_buf());
        assert_eq!(runner.load("checks"), None);
    }

    #[test]
    fn outside_window_never_fires() {
        let dir = tempdir().unwrap();
        let mut runner = SchedulerRunner::new(dir.path().to_path_buf());
        let sched = Schedule::parse("02:00-03:00@10").unwrap();
        assert_eq!(runner.next_fire("checks", &sched, 0, 10 * 60, 1_000.0), None);
    }

    #[test]
    fn failed_run_still_updates_last_run_timestamp() {
        let dir = tempdir().unwrap();
        let mut runner = SchedulerRunner::new(dir.path().to_path_buf());
        let sched = Schedule::parse("00:00-23:59@60").unwrap();
        runner.record_run("checks", false, 1_000.0).unwrap();
        assert_eq!(runner.next_fire("checks", &sched, 0, 120, 1_000.0 + 30.0), None);
    }
}

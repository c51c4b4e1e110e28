//! Scheduler (C2, §4.2): a small EBNF-ish grammar for recurring task
//! windows, and a runner that tracks per-task last-run timestamps on disk
//! so a daemon restart doesn't re-fire everything due at boot.

pub mod grammar;
pub mod runner;

pub use grammar::Schedule;
pub use runner::SchedulerRunner;

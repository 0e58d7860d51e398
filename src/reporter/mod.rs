//! Run progress reporting, generalizing dagrs's inline `log::info!` calls in
//! its executor into a trait so callers can swap in their own sink (spec §6:
//! "the CLI prints a one-line summary per task as it completes").

use std::fmt;

use crate::utils::log;

pub trait Reporter: Send + Sync {
    fn started(&self) {}
    fn finished(&self) {}
    fn task_skipped(&self, task_no: u64) {
        let _ = task_no;
    }
    fn task_started(&self, task_no: u64, name: &str) {
        let _ = (task_no, name);
    }
    fn task_completed(&self, task_no: u64, name: &str) {
        let _ = (task_no, name);
    }
    fn task_failed(&self, task_no: u64, name: &str, error: &str) {
        let _ = (task_no, name, error);
    }
    /// A significant grid-job state change: submitted, resubmitted, or
    /// otherwise transitioned (spec §6).
    fn task_grid_status(&self, task_no: u64, jobid: &str, message: &str) {
        let _ = (task_no, jobid, message);
    }
    /// One status-polling iteration for a grid job (spec §6), fired whether
    /// or not the job has stopped.
    fn task_grid_status_polling(&self, task_no: u64, jobid: &str, status: &str) {
        let _ = (task_no, jobid, status);
    }
}

/// Default reporter: logs through the `log` facade, same as dagrs's executor.
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn started(&self) {
        log::info("run started");
    }

    fn finished(&self) {
        log::info("run finished");
    }

    fn task_skipped(&self, task_no: u64) {
        log::debug(format!("task {task_no}: skipped, nothing changed"));
    }

    fn task_started(&self, task_no: u64, name: &str) {
        log::info(format!("task {task_no}: {name}"));
    }

    fn task_completed(&self, task_no: u64, name: &str) {
        log::info(format!("task {task_no}: {name}: done"));
    }

    fn task_failed(&self, task_no: u64, name: &str, error: &str) {
        log::error(format!("task {task_no}: {name}: {error}"));
    }

    fn task_grid_status(&self, task_no: u64, jobid: &str, message: &str) {
        log::info(format!("task {task_no}: grid job {jobid}: {message}"));
    }

    fn task_grid_status_polling(&self, task_no: u64, jobid: &str, status: &str) {
        log::debug(format!("task {task_no}: grid job {jobid}: polling, status={status}"));
    }
}

impl fmt::Debug for ConsoleReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConsoleReporter")
    }
}

/// Silences everything; used by tests that don't want log output.
pub struct SilentReporter;

impl Reporter for SilentReporter {}

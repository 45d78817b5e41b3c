//! The worker boundary.
//!
//! Workers interact with the master through exactly two operations:
//! take jobs and return results. [`drive`] runs them serially on the
//! caller's thread; [`run`] puts the master behind a mutex and fans
//! jobs out to scoped worker threads, blocking idle workers on a
//! condvar until a result frees up new work.

use crate::job::{Job, JobResult};
use crate::master::{FailureReport, Master};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Executes one job and returns its result.
///
/// Implementations own only the job payload; all state mutation happens
/// inside the master.
pub trait Worker: Sync {
    /// Run one job to completion. A panic or lost worker is
    /// indistinguishable from a failed result; the master never
    /// retries.
    fn execute(&self, job: &Job) -> JobResult;
}

impl<W: Worker> Worker for &W {
    fn execute(&self, job: &Job) -> JobResult {
        (**self).execute(job)
    }
}

/// Drive the master to quiescence on the current thread.
///
/// Takes jobs, executes them in order, and feeds results back until
/// [`Master::get_job`] yields nothing. The caller then reads the
/// verdict with [`Master::fail`].
pub fn drive<W: Worker>(master: &mut Master, worker: &W) {
    loop {
        let jobs = master.get_job();
        if jobs.is_empty() {
            break;
        }
        for job in jobs {
            let result = worker.execute(&job);
            master.register_result(result);
        }
    }
}

struct Shared {
    master: Mutex<Master>,
    wakeup: Condvar,
}

/// Drive the master with `workers` threads and return the terminal
/// verdict alongside the master.
pub fn run<W: Worker>(master: Master, worker: &W, workers: usize) -> (Master, Option<FailureReport>) {
    let shared = Shared {
        master: Mutex::new(master),
        wakeup: Condvar::new(),
    };

    std::thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            scope.spawn(|| worker_loop(&shared, worker));
        }
    });

    let master = shared.master.into_inner();
    let report = master.fail();
    (master, report)
}

fn worker_loop<W: Worker>(shared: &Shared, worker: &W) {
    loop {
        let jobs = {
            let mut master = shared.master.lock();
            let jobs = master.get_job();
            if jobs.is_empty() {
                if !master.has_pending() {
                    // Quiescent: wake everyone up so they exit too.
                    shared.wakeup.notify_all();
                    return;
                }
                // Results are outstanding on other workers.
                shared.wakeup.wait(&mut master);
                continue;
            }
            jobs
        };

        debug!(count = jobs.len(), "worker took jobs");
        for job in jobs {
            let result = worker.execute(&job);
            let mut master = shared.master.lock();
            master.register_result(result);
            shared.wakeup.notify_all();
        }
    }
}

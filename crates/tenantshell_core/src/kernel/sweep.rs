//! Periodic background sweep over every available tenant.
//!
//! # Invariants
//! - At most one sweep runs at a time; a call made while one is running
//!   returns `Skipped` instead of queueing.
//! - Each tenant is swept inside its own work scope, ended before the next.
//! - A failing task or tenant is logged and recorded; the sweep continues.

use crate::extension::capability::TAG_BACKGROUND_TASKS;
use crate::work::ambient::WorkContextAccessor;
use crate::work::scope::WorkScope;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::any::type_name;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Items filed under `background-tasks`.
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    fn sweep(&self, scope: &WorkScope) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOptions {
    pub interval: Duration,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub tenant: String,
    pub task: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tenants: usize,
    pub tasks_run: usize,
    pub failures: Vec<SweepFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    Skipped,
}

pub struct BackgroundSweep {
    accessor: Arc<WorkContextAccessor>,
    options: SweepOptions,
    running: Mutex<()>,
}

impl BackgroundSweep {
    pub fn new(accessor: Arc<WorkContextAccessor>, options: SweepOptions) -> Self {
        Self {
            accessor,
            options,
            running: Mutex::new(()),
        }
    }

    pub fn run_once(&self) -> SweepOutcome {
        let Some(_running) = self.running.try_lock() else {
            info!("event=sweep module=kernel status=skip reason=already_running");
            return SweepOutcome::Skipped;
        };

        let started = Instant::now();
        let mut report = SweepReport::default();
        for record in self.accessor.kernel().tenants() {
            if !record.state().is_available() {
                continue;
            }
            report.tenants += 1;
            self.sweep_tenant(record.name(), &mut report);
        }

        info!(
            "event=sweep module=kernel status=ok tenants={} tasks={} failures={} elapsed_ms={}",
            report.tenants,
            report.tasks_run,
            report.failures.len(),
            started.elapsed().as_millis()
        );
        SweepOutcome::Completed(report)
    }

    /// Runs sweeps every `interval` on a dedicated thread.
    pub fn start(self: &Arc<Self>) -> std::io::Result<SweepHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sweep = Arc::clone(self);
        let interval = self.options.interval;
        let thread = std::thread::Builder::new()
            .name("tenantshell-sweep".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        sweep.run_once();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        info!(
            "event=sweep_start module=kernel status=ok interval_ms={}",
            interval.as_millis()
        );
        Ok(SweepHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn sweep_tenant(&self, tenant: &str, report: &mut SweepReport) {
        let work = match self.accessor.begin(tenant) {
            Ok(work) => work,
            Err(err) => {
                warn!("event=sweep_tenant module=kernel status=error tenant={tenant} error={err}");
                report.failures.push(SweepFailure {
                    tenant: tenant.to_string(),
                    task: None,
                    message: err.to_string(),
                });
                return;
            }
        };

        match work.resolve_all::<Arc<dyn BackgroundTask>>(TAG_BACKGROUND_TASKS) {
            Ok(tasks) => {
                for task in tasks {
                    report.tasks_run += 1;
                    if let Err(message) = task.sweep(&work) {
                        error!(
                            "event=sweep_task module=kernel status=error tenant={} task={} error={}",
                            tenant,
                            task.name(),
                            message
                        );
                        report.failures.push(SweepFailure {
                            tenant: tenant.to_string(),
                            task: Some(task.name().to_string()),
                            message,
                        });
                    }
                }
            }
            Err(err) => {
                warn!("event=sweep_tenant module=kernel status=error tenant={tenant} error={err}");
                report.failures.push(SweepFailure {
                    tenant: tenant.to_string(),
                    task: None,
                    message: err.to_string(),
                });
            }
        }

        if let Err(err) = work.end() {
            warn!("event=sweep_tenant module=kernel status=error tenant={tenant} error={err}");
        }
    }
}

/// Stops the sweep thread on `stop` or drop.
pub struct SweepHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SweepHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("event=sweep_stop module=kernel status=error reason=thread_panicked");
            }
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
